//! Runtime configuration: secrets and network endpoints loaded from the
//! environment, as distinct from the declarative registry config
//! ([`crate::store::config_repo::TomlConfigRepo`]) loaded from TOML.

use crate::adapters::twap::PoolSpec;
use alloy::primitives::Address;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Everything the process entrypoint needs to construct an [`alloy`]
/// provider, wire up the price source adapters, and drive both schedulers.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub signer_key: String,

    pub registry_path: PathBuf,

    pub aggregator_poll_interval: Duration,
    pub balancer_poll_interval: Duration,
    pub per_adapter_timeout: Duration,
    pub fanout_deadline: Duration,
    pub receipt_poll_timeout: Duration,
    pub broadcast_backoff_base: Duration,

    pub pyth_base_url: String,
    /// `token_id -> Chainlink AggregatorV3Interface address`.
    pub chainlink_feeds: HashMap<String, Address>,
    /// `token_id -> Pyth Hermes feed id`.
    pub pyth_feed_ids: HashMap<String, String>,
    /// `token_id -> ERC-20 contract address` the balancer reads balances
    /// from and transfers out of.
    pub token_addresses: HashMap<String, Address>,
    /// `pool_id -> pool spec`, keyed the same way as `TokenCfg::allowed_pools`.
    pub twap_pools: HashMap<String, PoolSpec>,
}

impl RuntimeConfig {
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let poll_ms = |key: &str, default: u64| -> Result<Duration> {
            match std::env::var(key) {
                Ok(v) => Ok(Duration::from_millis(
                    v.parse().with_context(|| format!("{key} must be an integer number of milliseconds"))?,
                )),
                Err(_) => Ok(Duration::from_millis(default)),
            }
        };

        Ok(Self {
            rpc_url: std::env::var("RPC_URL").context("RPC_URL not set")?,
            chain_id: std::env::var("CHAIN_ID")
                .context("CHAIN_ID not set")?
                .parse()
                .context("CHAIN_ID must be an integer")?,
            signer_key: std::env::var("SIGNER_KEY").context("SIGNER_KEY not set")?,

            registry_path: PathBuf::from(
                std::env::var("REGISTRY_PATH").unwrap_or_else(|_| "registry.toml".to_string()),
            ),

            aggregator_poll_interval: poll_ms("AGGREGATOR_POLL_INTERVAL_MS", 10_000)?,
            balancer_poll_interval: poll_ms("BALANCER_POLL_INTERVAL_MS", 15_000)?,
            per_adapter_timeout: poll_ms("PER_ADAPTER_TIMEOUT_MS", 3_000)?,
            fanout_deadline: poll_ms("FANOUT_DEADLINE_MS", 5_000)?,
            receipt_poll_timeout: poll_ms("RECEIPT_POLL_TIMEOUT_MS", 30_000)?,
            broadcast_backoff_base: poll_ms("BROADCAST_BACKOFF_BASE_MS", 500)?,

            pyth_base_url: std::env::var("PYTH_BASE_URL")
                .unwrap_or_else(|_| "https://hermes.pyth.network".to_string()),
            chainlink_feeds: parse_address_map("CHAINLINK_FEEDS")?,
            pyth_feed_ids: parse_string_map("PYTH_FEED_IDS"),
            token_addresses: parse_address_map("TOKEN_ADDRESSES")?,
            twap_pools: parse_pool_specs("TWAP_POOLS")?,
        })
    }
}

/// Parses `TOKEN=value,TOKEN2=value2` env vars into a map.
fn parse_string_map(key: &str) -> HashMap<String, String> {
    std::env::var(key)
        .ok()
        .map(|raw| {
            raw.split(',')
                .filter(|entry| !entry.trim().is_empty())
                .filter_map(|entry| entry.split_once('='))
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .collect()
        })
        .unwrap_or_default()
}

fn parse_address_map(key: &str) -> Result<HashMap<String, Address>> {
    let raw = match std::env::var(key) {
        Ok(v) => v,
        Err(_) => return Ok(HashMap::new()),
    };

    raw.split(',')
        .filter(|entry| !entry.trim().is_empty())
        .map(|entry| {
            let (token, addr) = entry
                .split_once('=')
                .with_context(|| format!("{key} entry '{entry}' is not TOKEN=0x.. shaped"))?;
            let addr = Address::from_str(addr.trim())
                .with_context(|| format!("{key} entry '{entry}' has an invalid address"))?;
            Ok((token.trim().to_string(), addr))
        })
        .collect()
}

/// Parses `TWAP_POOLS=pool_id=address:token0_decimals:token1_decimals:invert,...`.
/// A flat env var rather than its own TOML section since it describes
/// wiring (which contract, which decimals) rather than policy.
fn parse_pool_specs(key: &str) -> Result<HashMap<String, PoolSpec>> {
    let raw = match std::env::var(key) {
        Ok(v) => v,
        Err(_) => return Ok(HashMap::new()),
    };

    raw.split(',')
        .filter(|entry| !entry.trim().is_empty())
        .map(|entry| {
            let fields: Vec<&str> = entry.trim().splitn(2, '=').collect();
            let [pool_id, spec] = fields.as_slice() else {
                anyhow::bail!("{key} entry '{entry}' is not pool_id=... shaped");
            };
            let parts: Vec<&str> = spec.split(':').collect();
            let (address, token0_decimals, token1_decimals, invert) = match parts.as_slice() {
                [address, d0, d1, invert] => (*address, *d0, *d1, *invert),
                _ => anyhow::bail!(
                    "{key} entry '{entry}' must be pool_id=address:token0_decimals:token1_decimals:invert"
                ),
            };

            let spec = PoolSpec {
                address: Address::from_str(address)
                    .with_context(|| format!("{key} entry '{entry}' has an invalid address"))?,
                token0_decimals: token0_decimals
                    .parse()
                    .with_context(|| format!("{key} entry '{entry}' has invalid token0_decimals"))?,
                token1_decimals: token1_decimals
                    .parse()
                    .with_context(|| format!("{key} entry '{entry}' has invalid token1_decimals"))?,
                invert: invert
                    .parse()
                    .with_context(|| format!("{key} entry '{entry}' has invalid invert flag"))?,
            };
            Ok((pool_id.to_string(), spec))
        })
        .collect()
}
