//! Process entrypoint: wires both schedulers into one multi-threaded Tokio
//! runtime and drives them until a shutdown signal arrives.

use alloy::providers::ProviderBuilder;
use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use clap::Parser;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use treasury_sync::adapters::chainlink::ChainlinkAdapter;
use treasury_sync::adapters::pyth::PythAdapter;
use treasury_sync::adapters::twap::TwapAdapter;
use treasury_sync::adapters::PriceSourceAdapter;
use treasury_sync::balancer::cooldown::RuleCooldown;
use treasury_sync::config::RuntimeConfig;
use treasury_sync::execution::{AlloyChainClient, ChainClient, DryRunChainClient, ExecutionEngine};
use treasury_sync::store::{ConfigRepo, InMemoryIntentStore, InMemoryLastGoodStore, TomlConfigRepo};
use treasury_sync::{aggregator, balancer, Aggregator, Balancer};

#[derive(Parser)]
#[command(name = "treasury-sync", about = "Price-driven treasury automation")]
struct Args {
    /// Path to the token/rule registry TOML file (overrides REGISTRY_PATH).
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Build the full pipeline and log decisions without broadcasting any
    /// transfer.
    #[arg(long)]
    dry_run: bool,

    /// Log verbosity when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .init();

    let cfg = RuntimeConfig::load().context("failed to load runtime configuration")?;
    let registry_path = args.config.unwrap_or_else(|| cfg.registry_path.clone());

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

    let last_good = Arc::new(InMemoryLastGoodStore::new());
    let intent_store = Arc::new(InMemoryIntentStore::new());

    let aggregator = Arc::new(Aggregator::new(
        config_repo.clone(),
        last_good.clone(),
        adapters,
        cfg.per_adapter_timeout,
        cfg.fanout_deadline,
    ));

    let live_chain_client = AlloyChainClient::new(provider.clone(), cfg.token_addresses.clone());
    let chain_client: Arc<dyn ChainClient> = if args.dry_run {
        info!("dry-run: transfers will be logged, not broadcast");
        Arc::new(DryRunChainClient::new(live_chain_client))
    } else {
        Arc::new(live_chain_client)
    };

    let execution_engine = Arc::new(ExecutionEngine::new(intent_store.clone(), chain_client.clone()));
    let balancer = Arc::new(Balancer::new(
        config_repo.clone(),
        chain_client.clone(),
        Arc::new(RuleCooldown::new()),
    ));

    let cancel = CancellationToken::new();
    spawn_shutdown_handler(cancel.clone());

    let tokens = config_repo.list_token_ids().await;
    let rule_scopes = config_repo.list_rule_scopes().await;
    info!(tokens = tokens.len(), rule_scopes = rule_scopes.len(), "starting schedulers");

    let aggregator_task = tokio::spawn(aggregator::scheduler::run(
        aggregator,
        tokens,
        cfg.aggregator_poll_interval,
        cancel.clone(),
    ));
    let balancer_task = tokio::spawn(balancer::scheduler::run(
        balancer,
        last_good,
        execution_engine,
        rule_scopes,
        cfg.balancer_poll_interval,
        cancel,
    ));

    let _ = tokio::join!(aggregator_task, balancer_task);
    info!("shutdown complete");
    Ok(())
}

/// Mirrors the mempool monitor's signal wiring: `SIGINT`/`SIGTERM` cancel
/// the shared token instead of killing the process outright, so in-flight
/// consolidation/execution rounds finish cleanly.
fn spawn_shutdown_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        use futures::stream::StreamExt;
        use signal_hook_tokio::Signals;

        let signals = match Signals::new([signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM]) {
            Ok(s) => s,
            Err(e) => {
                error!(%e, "failed to install signal handler, shutdown will rely on process kill");
                return;
            }
        };
        let mut signals = signals.fuse();

        if signals.next().await.is_some() {
            info!("shutdown signal received, cancelling in-flight work");
            cancel.cancel();
        }
    });
}
