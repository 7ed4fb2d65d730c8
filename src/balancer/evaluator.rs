//! Pure trigger decision: `(Rule, ConsolidatedPrice, balance, lastFireAt) → TransferSignal?`.
//!
//! Mirrors the shape of `validator::is_valid` — a free function with no
//! I/O and no shared state — generalized from "is this quote good enough"
//! to "should this rule fire". Every comparison goes through
//! [`crate::numeric`]; `rust_decimal::Decimal`'s `mantissa()`/`scale()` are
//! the only place a threshold ever leaves integer representation.

use crate::numeric::{bps_of, ge_cross_scale, le_cross_scale};
use crate::observability;
use crate::types::{AmountSpec, ConsolidatedPrice, Direction, Rule, TransferSignal};

/// Evaluate `rule` against `cp`. `balance_units` is the current on-chain
/// balance of the side the rule would move funds out of. `last_fire_at` is
/// the rule's last recorded fire time, if any.
pub fn evaluate(
    rule: &Rule,
    cp: &ConsolidatedPrice,
    balance_units: u128,
    last_fire_at: Option<i64>,
) -> Option<TransferSignal> {
    if !rule.enabled {
        return None;
    }

    if let Some(last) = last_fire_at {
        if cp.at.saturating_sub(last) < rule.cooldown_sec as i64 {
            return None;
        }
    }

    if !crosses_threshold(rule, cp) {
        return None;
    }

    let amount_units = match rule.amount {
        AmountSpec::Absolute { units } => units,
        AmountSpec::Percent { bps } => bps_of(balance_units, bps),
    };

    if amount_units > balance_units {
        observability::insufficient_balance(&rule.rule_id, amount_units, balance_units);
        return None;
    }

    Some(TransferSignal {
        rule_id: rule.rule_id.clone(),
        token_id: rule.token_id.clone(),
        chain_id: rule.chain_id,
        price_at_fire: cp.price,
        decimals_at_fire: cp.decimals,
        fired_at: cp.at,
        amount_units,
        direction: rule.direction,
        from: rule.from_addr(),
        to: rule.to_addr(),
        execution_mode: rule.execution_mode,
    })
}

fn crosses_threshold(rule: &Rule, cp: &ConsolidatedPrice) -> bool {
    let threshold_units = rule.threshold_usd.mantissa().unsigned_abs();
    let threshold_decimals = rule.threshold_usd.scale() as u8;
    let hysteresis_units = bps_of(threshold_units, rule.hysteresis_bps);

    match rule.direction {
        Direction::HotToCold => {
            let fire_at = threshold_units.saturating_add(hysteresis_units);
            ge_cross_scale(cp.price, cp.decimals, fire_at, threshold_decimals)
        }
        Direction::ColdToHot => {
            let fire_at = threshold_units.saturating_sub(hysteresis_units);
            le_cross_scale(cp.price, cp.decimals, fire_at, threshold_decimals)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConsolidationMode, ExecutionMode};
    use alloy::primitives::Address;
    use rust_decimal::Decimal;

    fn rule(direction: Direction, hysteresis_bps: u32, cooldown_sec: u64, amount: AmountSpec) -> Rule {
        Rule {
            rule_id: "r1".into(),
            token_id: "ETH".into(),
            chain_id: 137,
            threshold_usd: Decimal::new(2000, 0),
            direction,
            amount,
            hot_addr: Address::with_last_byte(1),
            cold_addr: Address::with_last_byte(2),
            execution_mode: ExecutionMode::DirectKey,
            hysteresis_bps,
            cooldown_sec,
            enabled: true,
        }
    }

    fn price_at(price: u128, at: i64) -> ConsolidatedPrice {
        ConsolidatedPrice {
            price,
            decimals: 18,
            at,
            mode: ConsolidationMode::Normal,
            sources_used: vec![],
        }
    }

    // S5 — HotToCold fire with percent amount.
    #[test]
    fn s5_hot_to_cold_percent_amount_fires() {
        let r = rule(Direction::HotToCold, 100, 3600, AmountSpec::Percent { bps: 5_000 });
        let cp = price_at(2_500_000_000_000_000_000_000, 1_700_000_000);
        let balance = 10_000_000_000_000_000_000u128; // 10 * 1e18

        let signal = evaluate(&r, &cp, balance, None).expect("should fire");
        assert_eq!(signal.amount_units, 5_000_000_000_000_000_000);
        assert_eq!(signal.direction, Direction::HotToCold);
        assert_eq!(signal.from, Address::with_last_byte(1));
        assert_eq!(signal.to, Address::with_last_byte(2));
    }

    #[test]
    fn disabled_rule_never_fires() {
        let mut r = rule(Direction::HotToCold, 0, 0, AmountSpec::Absolute { units: 1 });
        r.enabled = false;
        let cp = price_at(3_000_000_000_000_000_000_000, 100);
        assert!(evaluate(&r, &cp, 1_000, None).is_none());
    }

    #[test]
    fn cooldown_suppresses_repeat_fire() {
        let r = rule(Direction::HotToCold, 0, 3600, AmountSpec::Absolute { units: 1 });
        let cp = price_at(3_000_000_000_000_000_000_000, 2_000);
        assert!(evaluate(&r, &cp, 1_000, Some(1_000)).is_none());
    }

    #[test]
    fn cooldown_elapsed_allows_fire() {
        let r = rule(Direction::HotToCold, 0, 3600, AmountSpec::Absolute { units: 1 });
        let cp = price_at(3_000_000_000_000_000_000_000, 5_000);
        assert!(evaluate(&r, &cp, 1_000, Some(1_000)).is_some());
    }

    #[test]
    fn hysteresis_monotonicity_hot_to_cold() {
        // if p1 fires, p2 > p1 must also fire (all else equal).
        let r = rule(Direction::HotToCold, 100, 0, AmountSpec::Absolute { units: 1 });
        let p1 = price_at(2_020_000_000_000_000_000_000, 0); // threshold 2000 + 1% hysteresis = 2020
        let p2 = price_at(2_500_000_000_000_000_000_000, 0);
        assert!(evaluate(&r, &p1, 1_000, None).is_some());
        assert!(evaluate(&r, &p2, 1_000, None).is_some());
    }

    #[test]
    fn below_hysteresis_band_does_not_fire() {
        let r = rule(Direction::HotToCold, 100, 0, AmountSpec::Absolute { units: 1 });
        let cp = price_at(2_010_000_000_000_000_000_000, 0); // 2010 < 2020 threshold+hysteresis
        assert!(evaluate(&r, &cp, 1_000, None).is_none());
    }

    #[test]
    fn cold_to_hot_fires_below_threshold_minus_hysteresis() {
        let r = rule(Direction::ColdToHot, 100, 0, AmountSpec::Absolute { units: 1 });
        let cp = price_at(1_975_000_000_000_000_000_000, 0); // 1980 = 2000 - 1%
        assert!(evaluate(&r, &cp, 1_000, None).is_some());
    }

    #[test]
    fn insufficient_balance_suppresses_signal() {
        let r = rule(Direction::HotToCold, 0, 0, AmountSpec::Absolute { units: 2_000 });
        let cp = price_at(3_000_000_000_000_000_000_000, 0);
        assert!(evaluate(&r, &cp, 1_000, None).is_none());
    }

    #[test]
    fn percent_amount_truncates_toward_zero() {
        let r = rule(Direction::HotToCold, 0, 0, AmountSpec::Percent { bps: 3_333 });
        let cp = price_at(3_000_000_000_000_000_000_000, 0);
        let signal = evaluate(&r, &cp, 3, None).unwrap();
        assert_eq!(signal.amount_units, 0); // 3 * 3333 / 10000 truncates to 0
    }
}
