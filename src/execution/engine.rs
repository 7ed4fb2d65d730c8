//! Execution Engine: turn a `TransferSignal` into exactly one committed
//! transfer, durably, and tolerant of restarts.
//!
//! Check-then-broadcast-then-record, built around a durable state machine
//! instead of a single fire-and-forget call, with a capped backoff on
//! broadcast retries that stays within the same intent rather than
//! abandoning it.

use super::chain_client::{ChainClient, ReceiptOutcome};
use crate::error::TreasuryError;
use crate::observability;
use crate::store::IntentStore;
use crate::types::{ExecutionMode, IntentStatus, TransferIntent, TransferSignal};
use std::sync::Arc;
use std::time::Duration;

/// Signal timestamps are bucketed to this width before hashing into an
/// idempotency key, so two fires within the same window collapse onto one
/// intent instead of racing to create two.
const FIRE_WINDOW_SECS: i64 = 60;

const MAX_BROADCAST_ATTEMPTS: u32 = 3;
const BROADCAST_BACKOFF_BASE: Duration = Duration::from_millis(500);
const RECEIPT_POLL_TIMEOUT: Duration = Duration::from_secs(30);

/// Deterministic idempotency key for `signal`. Re-planning the same signal
/// (same rule, same bucketed fire time, same amount, same direction) always
/// produces the same key, so a duplicate insert reattaches instead of
/// creating a second intent.
pub fn idem_key(signal: &TransferSignal) -> String {
    let window = signal.fired_at.div_euclid(FIRE_WINDOW_SECS);
    format!(
        "{}:{}:{}:{:?}",
        signal.rule_id, window, signal.amount_units, signal.direction
    )
}

/// Drives `TransferSignal`s to a terminal (or durably resumable) state
/// against an [`IntentStore`] and a [`ChainClient`].
pub struct ExecutionEngine {
    intent_store: Arc<dyn IntentStore>,
    chain_client: Arc<dyn ChainClient>,
}

impl ExecutionEngine {
    pub fn new(intent_store: Arc<dyn IntentStore>, chain_client: Arc<dyn ChainClient>) -> Self {
        Self {
            intent_store,
            chain_client,
        }
    }

    /// Process one signal end to end. Always returns the resulting intent
    /// (possibly still non-terminal, e.g. `Submitted` awaiting a receipt) —
    /// the only hard errors are store-layer failures.
    pub async fn process(&self, signal: &TransferSignal) -> Result<TransferIntent, TreasuryError> {
        if let Some(in_flight) = self.intent_store.find_in_flight_for_rule(&signal.rule_id).await {
            let key = idem_key(signal);
            if in_flight.idem_key != key {
                // At most one in-flight intent per rule. A new fire while one
                // is outstanding is not planned; the in-flight intent keeps
                // draining on its own schedule.
                return Ok(in_flight);
            }
            // This row already existed before this call — it may be a fresh
            // re-fire of a Submitted intent awaiting receipt, or a Planned
            // intent recovered after a crash. Either way it's not new.
            return self.drive(in_flight, true).await;
        }

        let key = idem_key(signal);
        let planned = TransferIntent::planned(signal, key);
        let outcome = self.intent_store.insert_planned(planned).await?;
        let recovered = !outcome.was_inserted();
        if recovered {
            observability::intent_reattached(&outcome.clone().intent().idem_key);
        }
        self.drive(outcome.intent(), recovered).await
    }

    async fn drive(&self, intent: TransferIntent, recovered: bool) -> Result<TransferIntent, TreasuryError> {
        match intent.status {
            IntentStatus::Planned => match intent.mode {
                ExecutionMode::DirectKey => self.drive_direct_key(intent, recovered).await,
                ExecutionMode::MultisigPropose | ExecutionMode::MultisigExecute => {
                    self.propose(intent).await
                }
            },
            IntentStatus::Submitted => self.poll_receipt(intent).await,
            // Proposed intents wait on an out-of-scope external poller;
            // Planned/terminal cases above and below cover everything else.
            IntentStatus::Proposed | IntentStatus::MinedSuccess | IntentStatus::MinedFailed => Ok(intent),
        }
    }

    /// `recovered` is true when this `Planned` row already existed before
    /// this call (re-derived idem_key, crash restart). A recovered intent
    /// may have already been broadcast in a prior process that crashed
    /// between `chain_client.broadcast` returning and the resulting
    /// `Submitted` status committing — reconcile against the chain before
    /// broadcasting again so that window can't produce a duplicate transfer.
    async fn drive_direct_key(&self, intent: TransferIntent, recovered: bool) -> Result<TransferIntent, TreasuryError> {
        if recovered {
            match self.chain_client.find_pending_tx(&intent).await {
                Ok(Some(tx_hash)) => {
                    observability::intent_reconciled(&intent.idem_key, &tx_hash);
                    observability::intent_transition(&intent.idem_key, "Planned", "Submitted");
                    return self
                        .intent_store
                        .update_status(&intent.idem_key, IntentStatus::Submitted, Some(tx_hash), None, None)
                        .await;
                }
                Ok(None) => {}
                Err(e) => observability::transient_chain_error(&intent.idem_key, 0, &e),
            }
        }

        for attempt in 1..=MAX_BROADCAST_ATTEMPTS {
            match self.chain_client.broadcast(&intent).await {
                Ok(tx_hash) => {
                    observability::intent_transition(&intent.idem_key, "Planned", "Submitted");
                    return self
                        .intent_store
                        .update_status(
                            &intent.idem_key,
                            IntentStatus::Submitted,
                            Some(tx_hash),
                            None,
                            None,
                        )
                        .await;
                }
                Err(TreasuryError::TerminalChainError(reason)) => {
                    observability::terminal_chain_error(&intent.idem_key, &reason);
                    return self
                        .intent_store
                        .update_status(
                            &intent.idem_key,
                            IntentStatus::MinedFailed,
                            None,
                            None,
                            Some(reason),
                        )
                        .await;
                }
                Err(e) => {
                    observability::transient_chain_error(&intent.idem_key, attempt, &e);
                    if attempt < MAX_BROADCAST_ATTEMPTS {
                        tokio::time::sleep(BROADCAST_BACKOFF_BASE * attempt).await;
                    } else {
                        return self
                            .intent_store
                            .update_status(
                                &intent.idem_key,
                                IntentStatus::MinedFailed,
                                None,
                                None,
                                Some(format!("exhausted retries: {e}")),
                            )
                            .await;
                    }
                }
            }
        }
        unreachable!("loop always returns on its final iteration")
    }

    async fn propose(&self, intent: TransferIntent) -> Result<TransferIntent, TreasuryError> {
        let proposal_hash = format!("proposal:{}", intent.idem_key);
        observability::intent_transition(&intent.idem_key, "Planned", "Proposed");
        self.intent_store
            .update_status(
                &intent.idem_key,
                IntentStatus::Proposed,
                None,
                Some(proposal_hash),
                None,
            )
            .await
    }

    async fn poll_receipt(&self, intent: TransferIntent) -> Result<TransferIntent, TreasuryError> {
        let Some(tx_hash) = intent.tx_hash.clone() else {
            return Err(TreasuryError::Store(format!(
                "intent {} is Submitted with no tx_hash",
                intent.idem_key
            )));
        };

        match self.chain_client.await_receipt(&tx_hash, RECEIPT_POLL_TIMEOUT).await {
            Ok(ReceiptOutcome::Success) => {
                observability::intent_transition(&intent.idem_key, "Submitted", "MinedSuccess");
                self.intent_store
                    .update_status(&intent.idem_key, IntentStatus::MinedSuccess, None, None, None)
                    .await
            }
            Ok(ReceiptOutcome::Failed) => {
                observability::intent_transition(&intent.idem_key, "Submitted", "MinedFailed");
                self.intent_store
                    .update_status(
                        &intent.idem_key,
                        IntentStatus::MinedFailed,
                        None,
                        None,
                        Some("transaction reverted".to_string()),
                    )
                    .await
            }
            Ok(ReceiptOutcome::NotYet) => Ok(intent),
            Err(e) => {
                observability::transient_chain_error(&intent.idem_key, 0, &e);
                Ok(intent)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TreasuryError;
    use crate::store::InMemoryIntentStore;
    use crate::types::{AmountSpec, Direction};
    use alloy::primitives::Address;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn signal(rule_id: &str, fired_at: i64) -> TransferSignal {
        TransferSignal {
            rule_id: rule_id.to_string(),
            token_id: "ETH".into(),
            chain_id: 137,
            price_at_fire: 2_500_000_000_000_000_000_000,
            decimals_at_fire: 18,
            fired_at,
            amount_units: 5_000_000_000_000_000_000,
            direction: Direction::HotToCold,
            from: Address::with_last_byte(1),
            to: Address::with_last_byte(2),
            execution_mode: ExecutionMode::DirectKey,
        }
    }

    struct ScriptedChainClient {
        responses: Mutex<Vec<Result<String, TreasuryError>>>,
        receipt: Mutex<Vec<ReceiptOutcome>>,
        broadcast_calls: AtomicU32,
        pending_tx: Mutex<Option<String>>,
        find_pending_tx_calls: AtomicU32,
    }

    impl ScriptedChainClient {
        fn new(responses: Vec<Result<String, TreasuryError>>, receipt: Vec<ReceiptOutcome>) -> Self {
            Self {
                responses: Mutex::new(responses),
                receipt: Mutex::new(receipt),
                broadcast_calls: AtomicU32::new(0),
                pending_tx: Mutex::new(None),
                find_pending_tx_calls: AtomicU32::new(0),
            }
        }

        /// A client whose `find_pending_tx` reports `tx_hash` as already
        /// broadcast, simulating a crash recovered after `broadcast`
        /// returned but before the store recorded it.
        fn with_reconcilable_tx(tx_hash: &str) -> Self {
            let client = Self::new(vec![], vec![ReceiptOutcome::Success]);
            *client.pending_tx.lock().unwrap() = Some(tx_hash.to_string());
            client
        }
    }

    #[async_trait]
    impl ChainClient for ScriptedChainClient {
        async fn get_balance(&self, _owner: Address, _token_id: &str, _chain_id: u64) -> Result<u128, TreasuryError> {
            Ok(10_000_000_000_000_000_000)
        }

        async fn broadcast(&self, _intent: &TransferIntent) -> Result<String, TreasuryError> {
            self.broadcast_calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(TreasuryError::TransientChainError("no more scripted responses".into()));
            }
            responses.remove(0)
        }

        async fn await_receipt(&self, _tx_hash: &str, _timeout: Duration) -> Result<ReceiptOutcome, TreasuryError> {
            let mut receipts = self.receipt.lock().unwrap();
            if receipts.is_empty() {
                return Ok(ReceiptOutcome::NotYet);
            }
            Ok(receipts.remove(0))
        }

        async fn find_pending_tx(&self, _intent: &TransferIntent) -> Result<Option<String>, TreasuryError> {
            self.find_pending_tx_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.pending_tx.lock().unwrap().clone())
        }
    }

    // S5 — Planned -> Submitted -> MinedSuccess, second identical signal is a no-op.
    #[tokio::test]
    async fn s5_happy_path_and_duplicate_signal_reattaches() {
        let store = Arc::new(InMemoryIntentStore::new());
        let chain = Arc::new(ScriptedChainClient::new(
            vec![Ok("0xabc".to_string())],
            vec![ReceiptOutcome::Success],
        ));
        let engine = ExecutionEngine::new(store.clone(), chain.clone());

        let sig = signal("r1", 1_700_000_000);
        let first = engine.process(&sig).await.unwrap();
        assert_eq!(first.status, IntentStatus::Submitted);
        assert_eq!(first.tx_hash.as_deref(), Some("0xabc"));

        let confirmed = engine.drive(first.clone(), false).await.unwrap();
        assert_eq!(confirmed.status, IntentStatus::MinedSuccess);

        // A second identical signal is already terminal, not in-flight:
        // re-planning it must reattach to the same row, not create a new one.
        let second = engine.process(&sig).await.unwrap();
        assert_eq!(second.idem_key, first.idem_key);
        assert_eq!(chain.broadcast_calls.load(Ordering::SeqCst), 1);
    }

    // S6 — crash before receipt, restart, replay: reconciles via receipt lookup.
    #[tokio::test]
    async fn s6_restart_after_crash_reconciles_instead_of_rebroadcasting() {
        let store = Arc::new(InMemoryIntentStore::new());
        let chain = Arc::new(ScriptedChainClient::new(
            vec![Ok("0xdef".to_string())],
            vec![ReceiptOutcome::NotYet, ReceiptOutcome::Success],
        ));
        let engine = ExecutionEngine::new(store.clone(), chain.clone());

        let sig = signal("r1", 1_700_000_000);
        let submitted = engine.process(&sig).await.unwrap();
        assert_eq!(submitted.status, IntentStatus::Submitted);

        // Simulate restart: replay the same signal. Same rule has an
        // in-flight (non-terminal) intent with the same idem_key, so the
        // engine drives the existing row rather than broadcasting again.
        let replayed = engine.process(&sig).await.unwrap();
        assert_eq!(replayed.status, IntentStatus::Submitted, "still no receipt yet");
        assert_eq!(chain.broadcast_calls.load(Ordering::SeqCst), 1);

        let final_intent = engine.process(&sig).await.unwrap();
        assert_eq!(final_intent.status, IntentStatus::MinedSuccess);
        assert_eq!(chain.broadcast_calls.load(Ordering::SeqCst), 1);
    }

    // Planned-crash window: the row was durably Planned before the crash,
    // and chain_client.broadcast already went out in that lost process —
    // only the store commit to Submitted never landed. Recovery must
    // reconcile against the chain, not re-broadcast.
    #[tokio::test]
    async fn planned_intent_recovered_after_crash_reconciles_without_rebroadcasting() {
        let store = Arc::new(InMemoryIntentStore::new());
        let chain = Arc::new(ScriptedChainClient::with_reconcilable_tx("0xfeed"));
        let engine = ExecutionEngine::new(store.clone(), chain.clone());

        let sig = signal("r1", 1_700_000_000);
        let key = idem_key(&sig);
        store
            .insert_planned(TransferIntent::planned(&sig, key))
            .await
            .unwrap();

        let recovered = engine.process(&sig).await.unwrap();
        assert_eq!(recovered.status, IntentStatus::Submitted);
        assert_eq!(recovered.tx_hash.as_deref(), Some("0xfeed"));
        assert_eq!(chain.broadcast_calls.load(Ordering::SeqCst), 0);
        assert_eq!(chain.find_pending_tx_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn terminal_broadcast_error_marks_intent_mined_failed() {
        let store = Arc::new(InMemoryIntentStore::new());
        let chain = Arc::new(ScriptedChainClient::new(
            vec![Err(TreasuryError::TerminalChainError("insufficient funds".into()))],
            vec![],
        ));
        let engine = ExecutionEngine::new(store, chain);

        let sig = signal("r1", 1_700_000_000);
        let result = engine.process(&sig).await.unwrap();
        assert_eq!(result.status, IntentStatus::MinedFailed);
        assert_eq!(result.failure_reason.as_deref(), Some("insufficient funds"));
    }

    #[tokio::test]
    async fn transient_errors_retry_then_succeed() {
        let store = Arc::new(InMemoryIntentStore::new());
        let chain = Arc::new(ScriptedChainClient::new(
            vec![
                Err(TreasuryError::TransientChainError("timeout".into())),
                Err(TreasuryError::TransientChainError("timeout".into())),
                Ok("0x999".to_string()),
            ],
            vec![ReceiptOutcome::Success],
        ));
        let engine = ExecutionEngine::new(store, chain.clone());

        let sig = signal("r1", 1_700_000_000);
        let result = engine.process(&sig).await.unwrap();
        assert_eq!(result.status, IntentStatus::Submitted);
        assert_eq!(chain.broadcast_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn idem_key_is_stable_for_identical_signals_and_differs_for_different_amounts() {
        let a = signal("r1", 1_700_000_000);
        let mut b = signal("r1", 1_700_000_000);
        assert_eq!(idem_key(&a), idem_key(&b));

        b.amount_units += 1;
        assert_ne!(idem_key(&a), idem_key(&b));
    }
}
