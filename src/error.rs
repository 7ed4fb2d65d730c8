//! Typed error taxonomy for the treasury core.
//!
//! Library-internal functions return `Result<T, TreasuryError>`; the binaries
//! wrap these in `anyhow::Result` and attach context at each I/O boundary.

use crate::types::IntentStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TreasuryError {
    #[error("no price available for token {token_id}: no valid quotes and no last-good entry")]
    NoPriceAvailable { token_id: String },

    #[error("config missing for token {token_id}")]
    ConfigMissing { token_id: String },

    #[error("insufficient balance on rule {rule_id}: need {needed} units, have {available}")]
    InsufficientBalance {
        rule_id: String,
        needed: u128,
        available: u128,
    },

    #[error("transient chain error: {0}")]
    TransientChainError(String),

    #[error("terminal chain error: {0}")]
    TerminalChainError(String),

    #[error("intent {idem_key} already in status {status:?}, cannot transition to {attempted:?}")]
    InvalidTransition {
        idem_key: String,
        status: IntentStatus,
        attempted: IntentStatus,
    },

    #[error("store error: {0}")]
    Store(String),

    #[error("adapter {source} returned malformed data for {token_id}: {reason}")]
    MalformedQuote {
        source: String,
        token_id: String,
        reason: String,
    },
}

/// Non-error misses from an adapter. Not part of `TreasuryError` because a miss
/// is an expected outcome the Aggregator absorbs, never something propagated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoDataReason {
    NetworkFailure,
    UnknownSymbol,
    MalformedPayload,
    NonPositivePrice,
    Timeout,
    PoolNotAllowed,
    WindowUnavailable,
}

impl std::fmt::Display for NoDataReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NoDataReason::NetworkFailure => "network failure",
            NoDataReason::UnknownSymbol => "unknown symbol",
            NoDataReason::MalformedPayload => "malformed payload",
            NoDataReason::NonPositivePrice => "non-positive price",
            NoDataReason::Timeout => "timeout",
            NoDataReason::PoolNotAllowed => "pool not allowed",
            NoDataReason::WindowUnavailable => "window unavailable",
        };
        f.write_str(s)
    }
}
