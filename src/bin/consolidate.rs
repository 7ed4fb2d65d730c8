//! One-off operator utility: run a single consolidation round for a token
//! and print the resulting `ConsolidatedPrice`. Useful for debugging an
//! adapter or registry entry without starting the full daemon.

use alloy::providers::ProviderBuilder;
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use clap::Parser;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use treasury_sync::adapters::chainlink::ChainlinkAdapter;
use treasury_sync::adapters::pyth::PythAdapter;
use treasury_sync::adapters::twap::TwapAdapter;
use treasury_sync::adapters::PriceSourceAdapter;
use treasury_sync::config::RuntimeConfig;
use treasury_sync::store::{ConfigRepo, InMemoryLastGoodStore, TomlConfigRepo};
use treasury_sync::Aggregator;

#[derive(Parser)]
#[command(name = "consolidate", about = "Run one Aggregator round for a token and print the result")]
struct Args {
    /// Token id to consolidate, as it appears in the registry TOML.
    token_id: String,

    /// Path to the token/rule registry TOML file (overrides REGISTRY_PATH).
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let cfg = RuntimeConfig::load().context("failed to load runtime configuration")?;
    let registry_path = args.config.unwrap_or(cfg.registry_path.clone());

    let config_repo: Arc<dyn ConfigRepo> = Arc::new(
        TomlConfigRepo::load(&registry_path)
            .with_context(|| format!("failed to load registry at {}", registry_path.display()))?,
    );

    let signer = PrivateKeySigner::from_str(&cfg.signer_key).context("invalid SIGNER_KEY")?;
    let provider = ProviderBuilder::new()
        .wallet(signer)
        .connect_http(cfg.rpc_url.parse().context("invalid RPC_URL")?);

    let mut adapters: Vec<Arc<dyn PriceSourceAdapter>> = Vec::new();
    if !cfg.chainlink_feeds.is_empty() {
        adapters.push(Arc::new(ChainlinkAdapter::new(
            Arc::new(provider.clone()),
            cfg.chainlink_feeds.clone(),
        )));
    }
    if !cfg.pyth_feed_ids.is_empty() {
        adapters.push(Arc::new(PythAdapter::new(
            cfg.pyth_base_url.clone(),
            cfg.pyth_feed_ids.clone(),
        )));
    }
    if !cfg.twap_pools.is_empty() {
        adapters.push(Arc::new(TwapAdapter::new(
            Arc::new(provider.clone()),
            cfg.twap_pools.clone(),
        )));
    }
    if adapters.is_empty() {
        anyhow::bail!("no price source adapters configured: set CHAINLINK_FEEDS, PYTH_FEED_IDS, and/or TWAP_POOLS");
    }

    let aggregator = Aggregator::new(
        config_repo,
        Arc::new(InMemoryLastGoodStore::new()),
        adapters,
        cfg.per_adapter_timeout,
        cfg.fanout_deadline,
    );

    let cp = aggregator
        .consolidate(&args.token_id, CancellationToken::new())
        .await
        .context("consolidation failed")?;

    println!("{}", serde_json::to_string_pretty(&cp)?);
    Ok(())
}
