//! Intent store: durable, uniquely-keyed record of every transfer attempt.
//!
//! The same `DashMap`-wrapper shape as [`crate::store::last_good`], extended
//! to a keyed-tracker idiom generalized into an insert-or-reattach operation
//! over a unique `idem_key`.

use crate::error::TreasuryError;
use crate::types::{IntentStatus, TransferIntent};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// Outcome of [`IntentStore::insert_planned`]. `AlreadyExists` is the
/// expected, non-error result of an idempotency-key conflict — the engine
/// re-attaches to the existing row rather than treating this as a failure.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Inserted(TransferIntent),
    AlreadyExists(TransferIntent),
}

impl InsertOutcome {
    pub fn intent(self) -> TransferIntent {
        match self {
            InsertOutcome::Inserted(i) | InsertOutcome::AlreadyExists(i) => i,
        }
    }

    pub fn was_inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted(_))
    }
}

#[async_trait]
pub trait IntentStore: Send + Sync {
    /// Insert a freshly `Planned` intent. On an `idem_key` conflict, returns
    /// the existing row instead of erroring — re-planning the same signal
    /// must never create a second intent.
    async fn insert_planned(&self, intent: TransferIntent) -> Result<InsertOutcome, TreasuryError>;

    /// Advance `idem_key`'s status. Rejects any transition not in the
    /// allowed graph and any transition out of a terminal state.
    async fn update_status(
        &self,
        idem_key: &str,
        new_status: IntentStatus,
        tx_hash: Option<String>,
        proposal_hash: Option<String>,
        failure_reason: Option<String>,
    ) -> Result<TransferIntent, TreasuryError>;

    async fn find_by_idem_key(&self, idem_key: &str) -> Option<TransferIntent>;

    /// The rule's single in-flight (non-terminal) intent, if any. Used to
    /// enforce "at most one in-flight intent per rule".
    async fn find_in_flight_for_rule(&self, rule_id: &str) -> Option<TransferIntent>;
}

/// Returns whether `from -> to` is one of the allowed status transitions.
fn is_allowed_transition(from: IntentStatus, to: IntentStatus) -> bool {
    use IntentStatus::*;
    if from.is_terminal() {
        return false;
    }
    matches!(
        (from, to),
        (Planned, Proposed)
            | (Planned, Submitted)
            | (Planned, MinedFailed)
            | (Proposed, Submitted)
            | (Proposed, MinedFailed)
            | (Submitted, MinedSuccess)
            | (Submitted, MinedFailed)
    )
}

#[derive(Clone)]
pub struct InMemoryIntentStore {
    rows: Arc<DashMap<String, TransferIntent>>,
}

impl InMemoryIntentStore {
    pub fn new() -> Self {
        Self {
            rows: Arc::new(DashMap::new()),
        }
    }
}

impl Default for InMemoryIntentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IntentStore for InMemoryIntentStore {
    async fn insert_planned(&self, intent: TransferIntent) -> Result<InsertOutcome, TreasuryError> {
        match self.rows.entry(intent.idem_key.clone()) {
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(intent.clone());
                Ok(InsertOutcome::Inserted(intent))
            }
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                Ok(InsertOutcome::AlreadyExists(existing.get().clone()))
            }
        }
    }

    async fn update_status(
        &self,
        idem_key: &str,
        new_status: IntentStatus,
        tx_hash: Option<String>,
        proposal_hash: Option<String>,
        failure_reason: Option<String>,
    ) -> Result<TransferIntent, TreasuryError> {
        let mut entry = self
            .rows
            .get_mut(idem_key)
            .ok_or_else(|| TreasuryError::Store(format!("no intent for idem_key {idem_key}")))?;

        if !is_allowed_transition(entry.status, new_status) {
            return Err(TreasuryError::InvalidTransition {
                idem_key: idem_key.to_string(),
                status: entry.status,
                attempted: new_status,
            });
        }

        entry.status = new_status;
        if tx_hash.is_some() {
            entry.tx_hash = tx_hash;
        }
        if proposal_hash.is_some() {
            entry.proposal_hash = proposal_hash;
        }
        if failure_reason.is_some() {
            entry.failure_reason = failure_reason;
        }
        Ok(entry.clone())
    }

    async fn find_by_idem_key(&self, idem_key: &str) -> Option<TransferIntent> {
        self.rows.get(idem_key).map(|e| e.clone())
    }

    async fn find_in_flight_for_rule(&self, rule_id: &str) -> Option<TransferIntent> {
        self.rows
            .iter()
            .find(|e| e.rule_id == rule_id && !e.status.is_terminal())
            .map(|e| e.clone())
    }
}
