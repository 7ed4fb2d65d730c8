//! Per-rule cooldown tracker: last fire time, nothing escalating.
//!
//! A keyed-map shape matching a fixed `cooldownSec` gate — there is no
//! backoff escalation here, only "has enough wall-clock time passed since
//! this rule last fired". Backed by a `DashMap` so state is shared across
//! concurrently-running rule evaluations without a global lock.

use dashmap::DashMap;

/// Tracks the last `fired_at` timestamp (epoch seconds) per `rule_id`.
pub struct RuleCooldown {
    last_fire: DashMap<String, i64>,
}

impl RuleCooldown {
    pub fn new() -> Self {
        Self {
            last_fire: DashMap::new(),
        }
    }

    pub fn last_fire_at(&self, rule_id: &str) -> Option<i64> {
        self.last_fire.get(rule_id).map(|v| *v)
    }

    /// Record a fire at `fired_at`. Only advances the timestamp forward —
    /// a re-evaluation that replays an older signal never rewinds the
    /// cooldown clock.
    pub fn record_fire(&self, rule_id: &str, fired_at: i64) {
        self.last_fire
            .entry(rule_id.to_string())
            .and_modify(|v| {
                if fired_at > *v {
                    *v = fired_at;
                }
            })
            .or_insert(fired_at);
    }
}

impl Default for RuleCooldown {
    fn default() -> Self {
        Self::new()
    }
}
