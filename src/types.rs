//! Core data structures for the price aggregator and wallet balancer.

use alloy::primitives::Address;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Canonical decimal scale every `ConsolidatedPrice` is stored at.
pub const CANONICAL_DECIMALS: u8 = 18;

/// TOML's integer type tops out at `i64`; liquidity/unit fields routinely
/// exceed that (e.g. `10^21` wei). The registry TOML carries these as
/// strings; this accepts either that or a plain integer for convenience in
/// small test fixtures.
fn deser_u128<'de, D>(deserializer: D) -> Result<u128, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum U128Repr {
        Str(String),
        Num(u64),
    }

    match U128Repr::deserialize(deserializer)? {
        U128Repr::Str(s) => s.parse().map_err(D::Error::custom),
        U128Repr::Num(n) => Ok(n as u128),
    }
}

/// Identifies which kind of external price source produced a [`Quote`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceTag {
    Chainlink,
    Pyth,
    UniswapV3Twap,
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceTag::Chainlink => "chainlink",
            SourceTag::Pyth => "pyth",
            SourceTag::UniswapV3Twap => "uniswap_v3_twap",
        };
        f.write_str(s)
    }
}

/// Source-specific fields carried alongside a [`Quote`]'s raw price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QuoteMeta {
    /// Direct-publisher feeds carry nothing beyond price/decimals/at.
    None,
    /// Publisher-aggregated feeds (Pyth-style) report a confidence interval
    /// in the same decimals as `Quote::price`.
    Confidence { confidence: u128 },
    /// DEX TWAP adapters report the pool and window the observation came
    /// from, plus a liquidity metric the validator gates on.
    Twap {
        pool_id: String,
        window_sec: u64,
        liquidity_metric: u128,
    },
}

/// One observation from one source, normalized but not yet rescaled.
///
/// `price * 10^-decimals` is the USD value. `decimals` is preserved in the
/// source's native scale; rescaling to [`CANONICAL_DECIMALS`] happens only
/// during aggregation (see `aggregator::consolidate`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub source: SourceTag,
    pub token_id: String,
    pub price: u128,
    pub decimals: u8,
    pub at: i64,
    pub meta: QuoteMeta,
}

/// Degradation mode a [`ConsolidatedPrice`] was produced under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsolidationMode {
    /// Two or more sources agreed; price is their median.
    Normal,
    /// Exactly one source survived validation.
    Degraded,
    /// No source survived validation; price carried over from the last-good
    /// store. `sources_used` is empty in this mode.
    Frozen,
}

/// Result of one aggregation run for one token. Always at
/// [`CANONICAL_DECIMALS`], regardless of mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidatedPrice {
    pub price: u128,
    pub decimals: u8,
    pub at: i64,
    pub mode: ConsolidationMode,
    pub sources_used: Vec<Quote>,
}

impl ConsolidatedPrice {
    /// `price` as a human-scale `Decimal`, for logging and threshold display.
    pub fn as_decimal(&self) -> Decimal {
        Decimal::from_i128_with_scale(self.price as i128, self.decimals as u32)
    }
}

/// Per-token configuration the Validator and Aggregator read at run time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenCfg {
    pub token_id: String,
    pub chain_id: u64,
    /// Freshness budget per source, in seconds.
    pub ttl_by_source: HashMap<SourceTag, u64>,
    /// Confidence/price ratio ceiling, scaled by 1_000_000 (so 1% = 10_000).
    #[serde(default = "default_epsilon_micros")]
    pub epsilon_micros: u64,
    /// Divergence alert threshold in basis points. Advisory only; never
    /// rejects a source.
    #[serde(default = "default_delta_bps")]
    pub delta_bps: u32,
    #[serde(default)]
    pub twap_window_sec: u64,
    #[serde(default, deserialize_with = "deser_u128")]
    pub min_liquidity: u128,
    /// Pools the TWAP adapter may read from, in the order they should be
    /// tried — the Aggregator takes the first one that yields a Quote for
    /// the requested window, so order here is load-bearing, not incidental.
    #[serde(default)]
    pub allowed_pools: Vec<String>,
}

fn default_epsilon_micros() -> u64 {
    10_000 // 1%
}

fn default_delta_bps() -> u32 {
    150
}

/// Which side of a rule's pair the transfer moves value out of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    HotToCold,
    ColdToHot,
}

/// How much to move when a rule fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AmountSpec {
    Absolute {
        #[serde(deserialize_with = "deser_u128")]
        units: u128,
    },
    Percent {
        bps: u32,
    },
}

/// How a fired rule's transfer is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Sign and broadcast directly with a locally-held key.
    DirectKey,
    /// Submit a proposal to an external multisig for later execution.
    MultisigPropose,
    /// Execute a proposal an external multisig has already approved.
    MultisigExecute,
}

/// One configured balancer trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub rule_id: String,
    pub token_id: String,
    pub chain_id: u64,
    pub threshold_usd: Decimal,
    pub direction: Direction,
    pub amount: AmountSpec,
    pub hot_addr: Address,
    pub cold_addr: Address,
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub hysteresis_bps: u32,
    #[serde(default)]
    pub cooldown_sec: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Rule {
    pub fn from_addr(&self) -> Address {
        match self.direction {
            Direction::HotToCold => self.hot_addr,
            Direction::ColdToHot => self.cold_addr,
        }
    }

    pub fn to_addr(&self) -> Address {
        match self.direction {
            Direction::HotToCold => self.cold_addr,
            Direction::ColdToHot => self.hot_addr,
        }
    }
}

/// Output of [`crate::balancer::evaluator::evaluate`]: a rule wants to move
/// funds. Not yet durable; the Execution Engine turns this into a
/// [`TransferIntent`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSignal {
    pub rule_id: String,
    pub token_id: String,
    pub chain_id: u64,
    pub price_at_fire: u128,
    pub decimals_at_fire: u8,
    pub fired_at: i64,
    pub amount_units: u128,
    pub direction: Direction,
    pub from: Address,
    pub to: Address,
    pub execution_mode: ExecutionMode,
}

/// Status of a [`TransferIntent`]. Transitions are total-ordered and never
/// go backward; see `execution::engine` for the allowed graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentStatus {
    Planned,
    Proposed,
    Submitted,
    MinedSuccess,
    MinedFailed,
}

impl IntentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, IntentStatus::MinedSuccess | IntentStatus::MinedFailed)
    }
}

/// Durable record of one transfer attempt. Created once per `idem_key` and
/// never deleted; it is the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferIntent {
    pub idem_key: String,
    pub rule_id: String,
    pub token_id: String,
    pub chain_id: u64,
    pub price_at_fire: u128,
    pub decimals_at_fire: u8,
    pub fired_at: i64,
    pub amount_units: u128,
    pub direction: Direction,
    pub from: Address,
    pub to: Address,
    pub mode: ExecutionMode,
    pub status: IntentStatus,
    pub tx_hash: Option<String>,
    pub proposal_hash: Option<String>,
    pub failure_reason: Option<String>,
}

impl TransferIntent {
    pub fn planned(signal: &TransferSignal, idem_key: String) -> Self {
        Self {
            idem_key,
            rule_id: signal.rule_id.clone(),
            token_id: signal.token_id.clone(),
            chain_id: signal.chain_id,
            price_at_fire: signal.price_at_fire,
            decimals_at_fire: signal.decimals_at_fire,
            fired_at: signal.fired_at,
            amount_units: signal.amount_units,
            direction: signal.direction,
            from: signal.from,
            to: signal.to,
            mode: signal.execution_mode,
            status: IntentStatus::Planned,
            tx_hash: None,
            proposal_hash: None,
            failure_reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_direction_picks_correct_legs() {
        let rule = Rule {
            rule_id: "r1".into(),
            token_id: "ETH".into(),
            chain_id: 137,
            threshold_usd: Decimal::new(2000, 0),
            direction: Direction::HotToCold,
            amount: AmountSpec::Absolute { units: 1 },
            hot_addr: Address::ZERO,
            cold_addr: Address::with_last_byte(1),
            execution_mode: ExecutionMode::DirectKey,
            hysteresis_bps: 0,
            cooldown_sec: 0,
            enabled: true,
        };
        assert_eq!(rule.from_addr(), Address::ZERO);
        assert_eq!(rule.to_addr(), Address::with_last_byte(1));
    }

    #[test]
    fn intent_status_terminal_classification() {
        assert!(IntentStatus::MinedSuccess.is_terminal());
        assert!(IntentStatus::MinedFailed.is_terminal());
        assert!(!IntentStatus::Planned.is_terminal());
        assert!(!IntentStatus::Submitted.is_terminal());
    }

    #[test]
    fn consolidated_price_as_decimal() {
        let cp = ConsolidatedPrice {
            price: 2_000_000_000_000_000_000_000,
            decimals: 18,
            at: 0,
            mode: ConsolidationMode::Normal,
            sources_used: vec![],
        };
        assert_eq!(cp.as_decimal(), Decimal::new(2000, 0));
    }
}
