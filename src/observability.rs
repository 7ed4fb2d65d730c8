//! Structured `tracing` events for the crate's observable state changes.
//!
//! Thin wrappers so call sites read as intent ("a quote was dropped") rather
//! than repeating field names, matching the structured `info!`/`warn!`/
//! `debug!` conventions used throughout the rest of this codebase.

use crate::types::{ConsolidationMode, SourceTag};
use tracing::{debug, info, warn};

pub fn adapter_miss(source: SourceTag, token_id: &str, reason: impl std::fmt::Display) {
    debug!(%source, token_id, %reason, "adapter returned no data");
}

pub fn validation_reject(source: SourceTag, token_id: &str) {
    debug!(%source, token_id, "quote dropped by validator");
}

pub fn divergence_exceeded(token_id: &str, source: SourceTag, dev_bps: u128, delta_bps: u32) {
    warn!(
        token_id,
        %source,
        dev_bps,
        delta_bps,
        "source price diverges from consolidated median beyond threshold"
    );
}

pub fn mode_changed(token_id: &str, mode: ConsolidationMode) {
    info!(token_id, ?mode, "consolidated price mode");
}

pub fn insufficient_balance(rule_id: &str, needed: u128, available: u128) {
    warn!(rule_id, needed, available, "rule suppressed: insufficient balance");
}

pub fn intent_transition(idem_key: &str, from: &str, to: &str) {
    info!(idem_key, from, to, "transfer intent status transition");
}

pub fn intent_reattached(idem_key: &str) {
    info!(idem_key, "idempotency conflict: re-attached to existing intent");
}

pub fn intent_reconciled(idem_key: &str, tx_hash: &str) {
    info!(idem_key, tx_hash, "recovered planned intent reconciled to an already-broadcast transfer");
}

pub fn transient_chain_error(idem_key: &str, attempt: u32, err: impl std::fmt::Display) {
    warn!(idem_key, attempt, %err, "transient chain error, retrying with backoff");
}

pub fn terminal_chain_error(idem_key: &str, err: impl std::fmt::Display) {
    tracing::error!(idem_key, %err, "terminal chain error, marking intent failed");
}
