//! Stage B: turn a consolidated price into a transfer decision per rule.
//!
//! Splits pure decision from execution: [`evaluator::evaluate`] is a pure
//! function with no I/O, and this module's [`Balancer`] reads current state,
//! calls the pure function, and hands any resulting signal to an executor.

pub mod cooldown;
pub mod evaluator;
pub mod scheduler;

use crate::error::TreasuryError;
use crate::execution::ChainClient;
use crate::store::ConfigRepo;
use crate::types::{ConsolidatedPrice, Rule, TransferSignal};
use cooldown::RuleCooldown;
use std::sync::Arc;

/// Evaluates every enabled rule for one token against its current
/// consolidated price, honoring cooldown and balance.
pub struct Balancer {
    config_repo: Arc<dyn ConfigRepo>,
    chain_client: Arc<dyn ChainClient>,
    cooldown: Arc<RuleCooldown>,
}

impl Balancer {
    pub fn new(
        config_repo: Arc<dyn ConfigRepo>,
        chain_client: Arc<dyn ChainClient>,
        cooldown: Arc<RuleCooldown>,
    ) -> Self {
        Self {
            config_repo,
            chain_client,
            cooldown,
        }
    }

    /// Evaluate every enabled rule configured for `(token_id, chain_id)`
    /// against `cp`, returning one `TransferSignal` per rule that fires.
    pub async fn evaluate_token(
        &self,
        token_id: &str,
        chain_id: u64,
        cp: &ConsolidatedPrice,
    ) -> Vec<TransferSignal> {
        let rules = self.config_repo.get_enabled_rules(token_id, chain_id).await;
        let mut signals = Vec::with_capacity(rules.len());
        for rule in &rules {
            if let Some(signal) = self.evaluate_rule(rule, cp).await {
                signals.push(signal);
            }
        }
        signals
    }

    async fn evaluate_rule(&self, rule: &Rule, cp: &ConsolidatedPrice) -> Option<TransferSignal> {
        let last_fire_at = self.cooldown.last_fire_at(&rule.rule_id);
        let balance = match self.balance_for(rule).await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(rule_id = %rule.rule_id, %e, "balance read failed, skipping rule this round");
                return None;
            }
        };

        let signal = evaluator::evaluate(rule, cp, balance, last_fire_at)?;
        self.cooldown.record_fire(&rule.rule_id, signal.fired_at);
        Some(signal)
    }

    async fn balance_for(&self, rule: &Rule) -> Result<u128, TreasuryError> {
        self.chain_client
            .get_balance(rule.from_addr(), &rule.token_id, rule.chain_id)
            .await
    }
}

pub use evaluator::evaluate;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ReceiptOutcome;
    use crate::store::TomlConfigRepo;
    use crate::types::{ConsolidationMode, Direction};
    use alloy::primitives::Address;
    use async_trait::async_trait;
    use std::time::Duration;

    struct FixedBalanceClient {
        balance: u128,
    }

    #[async_trait]
    impl ChainClient for FixedBalanceClient {
        async fn get_balance(&self, _owner: Address, _token_id: &str, _chain_id: u64) -> Result<u128, TreasuryError> {
            Ok(self.balance)
        }

        async fn broadcast(&self, _intent: &crate::types::TransferIntent) -> Result<String, TreasuryError> {
            unimplemented!("not exercised by balancer tests")
        }

        async fn await_receipt(&self, _tx_hash: &str, _timeout: Duration) -> Result<ReceiptOutcome, TreasuryError> {
            unimplemented!("not exercised by balancer tests")
        }

        async fn find_pending_tx(&self, _intent: &crate::types::TransferIntent) -> Result<Option<String>, TreasuryError> {
            unimplemented!("not exercised by balancer tests")
        }
    }

    fn fixture_path() -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("treasury-sync-balancer-test-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            r#"
[[rules]]
rule_id = "eth-hot-cold"
token_id = "ETH"
chain_id = 137
threshold_usd = "2000.00"
direction = "HotToCold"
hot_addr = "0x0000000000000000000000000000000000000001"
cold_addr = "0x0000000000000000000000000000000000000002"
execution_mode = "DirectKey"
hysteresis_bps = 0
cooldown_sec = 3600
enabled = true

[rules.amount]
kind = "percent"
bps = 5000
"#,
        )
        .unwrap();
        path
    }

    fn cp(price: u128) -> ConsolidatedPrice {
        ConsolidatedPrice {
            price,
            decimals: 18,
            at: 1_700_000_000,
            mode: ConsolidationMode::Normal,
            sources_used: vec![],
        }
    }

    #[tokio::test]
    async fn evaluate_token_fires_enabled_rule_above_threshold() {
        let repo = Arc::new(TomlConfigRepo::load(fixture_path()).unwrap());
        let chain = Arc::new(FixedBalanceClient {
            balance: 10_000_000_000_000_000_000,
        });
        let balancer = Balancer::new(repo, chain, Arc::new(RuleCooldown::new()));

        let signals = balancer.evaluate_token("ETH", 137, &cp(2_500_000_000_000_000_000_000)).await;
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].amount_units, 5_000_000_000_000_000_000);
        assert_eq!(signals[0].direction, Direction::HotToCold);
    }

    #[tokio::test]
    async fn evaluate_token_skips_rule_below_threshold() {
        let repo = Arc::new(TomlConfigRepo::load(fixture_path()).unwrap());
        let chain = Arc::new(FixedBalanceClient {
            balance: 10_000_000_000_000_000_000,
        });
        let balancer = Balancer::new(repo, chain, Arc::new(RuleCooldown::new()));

        let signals = balancer.evaluate_token("ETH", 137, &cp(1_500_000_000_000_000_000_000)).await;
        assert!(signals.is_empty());
    }

    #[tokio::test]
    async fn evaluate_token_honors_cooldown_across_calls() {
        let repo = Arc::new(TomlConfigRepo::load(fixture_path()).unwrap());
        let chain = Arc::new(FixedBalanceClient {
            balance: 10_000_000_000_000_000_000,
        });
        let balancer = Balancer::new(repo, chain, Arc::new(RuleCooldown::new()));

        let first = balancer.evaluate_token("ETH", 137, &cp(2_500_000_000_000_000_000_000)).await;
        assert_eq!(first.len(), 1);

        let second = balancer.evaluate_token("ETH", 137, &cp(2_500_000_000_000_000_000_000)).await;
        assert!(second.is_empty(), "cooldown should suppress the immediate re-fire");
    }
}
