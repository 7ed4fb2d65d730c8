//! Per-quote freshness and quality gate.
//!
//! `isValid` is a pure function of a quote, the token's configuration, and
//! the current time. It never mutates anything and never talks to the
//! network; the Aggregator calls it once per fetched [`Quote`].

use crate::types::{QuoteMeta, Quote, TokenCfg};
use crate::numeric::confidence_within_epsilon;

/// True if `q` passes every gate applicable to its source kind.
pub fn is_valid(q: &Quote, cfg: &TokenCfg, now: i64) -> bool {
    is_fresh(q, cfg, now) && passes_confidence(q, cfg) && passes_twap_gates(q, cfg)
}

fn is_fresh(q: &Quote, cfg: &TokenCfg, now: i64) -> bool {
    let ttl = match cfg.ttl_by_source.get(&q.source) {
        Some(ttl) => *ttl,
        None => return false, // no TTL configured for this source: treat as not trusted
    };
    let age = now.saturating_sub(q.at);
    age >= 0 && (age as u64) <= ttl
}

fn passes_confidence(q: &Quote, cfg: &TokenCfg) -> bool {
    match &q.meta {
        QuoteMeta::Confidence { confidence } => {
            confidence_within_epsilon(*confidence, q.price, cfg.epsilon_micros)
        }
        _ => true,
    }
}

fn passes_twap_gates(q: &Quote, cfg: &TokenCfg) -> bool {
    match &q.meta {
        QuoteMeta::Twap {
            pool_id,
            window_sec,
            liquidity_metric,
        } => {
            cfg.allowed_pools.contains(pool_id)
                && *window_sec >= cfg.twap_window_sec
                && *liquidity_metric >= cfg.min_liquidity
        }
        _ => true,
    }
}
