//! Stage A: consolidate per-token USD quotes into one trustworthy value.
//!
//! Implements the `consolidate(tokenId)` procedure: scan every configured
//! source, drop what fails freshness or quality gates, and combine the
//! survivors into one price, entirely over integer-only math (see
//! [`crate::numeric`]).

pub mod scheduler;

use crate::adapters::{FetchParams, PriceSourceAdapter};
use crate::error::TreasuryError;
use crate::numeric::{deviation_bps, median_sorted, rescale};
use crate::observability;
use crate::store::{ConfigRepo, LastGoodStore};
use crate::types::{ConsolidatedPrice, ConsolidationMode, Quote, SourceTag, TokenCfg, CANONICAL_DECIMALS};
use crate::validator::is_valid;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Consolidates quotes for one token at a time. Cheap to construct per
/// caller; the adapter list and stores are shared `Arc`s, so multiple
/// `Aggregator` instances (one per concurrently-running token) don't
/// duplicate network clients.
pub struct Aggregator {
    config_repo: Arc<dyn ConfigRepo>,
    last_good: Arc<dyn LastGoodStore>,
    adapters: Vec<Arc<dyn PriceSourceAdapter>>,
    per_adapter_timeout: Duration,
    fanout_deadline: Duration,
}

impl Aggregator {
    pub fn new(
        config_repo: Arc<dyn ConfigRepo>,
        last_good: Arc<dyn LastGoodStore>,
        adapters: Vec<Arc<dyn PriceSourceAdapter>>,
        per_adapter_timeout: Duration,
        fanout_deadline: Duration,
    ) -> Self {
        Self {
            config_repo,
            last_good,
            adapters,
            per_adapter_timeout,
            fanout_deadline,
        }
    }

    /// Runs one consolidation round for `token_id`. Always returns a valid
    /// `ConsolidatedPrice` unless the config is missing or the token has
    /// zero valid quotes and no last-good row to freeze from.
    pub async fn consolidate(
        &self,
        token_id: &str,
        cancel: CancellationToken,
    ) -> Result<ConsolidatedPrice, TreasuryError> {
        let cfg = self
            .config_repo
            .get_token_cfg(token_id)
            .await
            .ok_or_else(|| TreasuryError::ConfigMissing {
                token_id: token_id.to_string(),
            })?;
        let now = now_secs();

        let quotes = tokio::select! {
            biased;
            _ = cancel.cancelled() => Vec::new(),
            quotes = self.fetch_all(token_id, &cfg, now) => quotes,
        };

        let survivors: Vec<Quote> = quotes.into_iter().filter(|q| is_valid(q, &cfg, now)).collect();
        if survivors.is_empty() {
            return self.freeze_or_fail(token_id, now).await;
        }

        let mut rescaled: Vec<(u128, Quote)> = survivors
            .into_iter()
            .map(|q| {
                let r = rescale(q.price, q.decimals, CANONICAL_DECIMALS);
                (r, q)
            })
            .collect();
        rescaled.sort_by_key(|(r, _)| *r);

        let (mode, price) = if rescaled.len() == 1 {
            (ConsolidationMode::Degraded, rescaled[0].0)
        } else {
            let values: Vec<u128> = rescaled.iter().map(|(r, _)| *r).collect();
            (ConsolidationMode::Normal, median_sorted(&values))
        };

        for (r, q) in &rescaled {
            let dev = deviation_bps(*r, price);
            if dev > cfg.delta_bps as u128 {
                observability::divergence_exceeded(token_id, q.source, dev, cfg.delta_bps);
            }
        }

        let sources_used = rescaled.into_iter().map(|(_, q)| q).collect();
        let cp = ConsolidatedPrice {
            price,
            decimals: CANONICAL_DECIMALS,
            at: now,
            mode,
            sources_used,
        };
        self.last_good.put(token_id, cp.clone()).await?;
        observability::mode_changed(token_id, cp.mode);
        Ok(cp)
    }

    async fn freeze_or_fail(
        &self,
        token_id: &str,
        now: i64,
    ) -> Result<ConsolidatedPrice, TreasuryError> {
        match self.last_good.get(token_id).await {
            Some(last) => {
                let cp = ConsolidatedPrice {
                    price: last.price,
                    decimals: last.decimals,
                    at: now,
                    mode: ConsolidationMode::Frozen,
                    sources_used: Vec::new(),
                };
                self.last_good.put(token_id, cp.clone()).await?;
                observability::mode_changed(token_id, ConsolidationMode::Frozen);
                Ok(cp)
            }
            None => Err(TreasuryError::NoPriceAvailable {
                token_id: token_id.to_string(),
            }),
        }
    }

    /// Fan out to every configured adapter concurrently, bounded by a single
    /// wall-clock deadline for the whole round. A missing adapter
    /// deadline is treated exactly like `NoData` — it never fails the run.
    async fn fetch_all(&self, token_id: &str, cfg: &TokenCfg, now: i64) -> Vec<Quote> {
        let tasks = self.adapters.iter().cloned().map(|adapter| {
            let token_id = token_id.to_string();
            let cfg = cfg.clone();
            let per_adapter_timeout = self.per_adapter_timeout;
            async move {
                match adapter.source_tag() {
                    SourceTag::UniswapV3Twap => {
                        fetch_twap(adapter, &token_id, &cfg, per_adapter_timeout, now).await
                    }
                    _ => fetch_one(adapter, &token_id, &FetchParams::default(), per_adapter_timeout).await,
                }
            }
        });

        match tokio::time::timeout(self.fanout_deadline, futures::future::join_all(tasks)).await {
            Ok(results) => results.into_iter().flatten().collect(),
            Err(_) => Vec::new(),
        }
    }
}

async fn fetch_one(
    adapter: Arc<dyn PriceSourceAdapter>,
    token_id: &str,
    params: &FetchParams,
    timeout: Duration,
) -> Option<Quote> {
    match tokio::time::timeout(timeout, adapter.fetch(token_id, params)).await {
        Ok(Ok(quote)) => Some(quote),
        Ok(Err(reason)) => {
            observability::adapter_miss(adapter.source_tag(), token_id, reason);
            None
        }
        Err(_) => {
            observability::adapter_miss(adapter.source_tag(), token_id, "per-adapter deadline exceeded");
            None
        }
    }
}

/// TWAP sources are handled specially: the Aggregator, not the adapter, owns
/// `allowedPools` and iterates them in declared order, stopping at the first
/// pool that yields a quote for the configured window. The
/// adapter has no single observation instant, so the quote is stamped with
/// wall-clock `now` here, not the adapter's own `at`.
async fn fetch_twap(
    adapter: Arc<dyn PriceSourceAdapter>,
    token_id: &str,
    cfg: &TokenCfg,
    timeout: Duration,
    now: i64,
) -> Option<Quote> {
    for pool_id in &cfg.allowed_pools {
        let params = FetchParams {
            pool_id: Some(pool_id.clone()),
            window_sec: Some(cfg.twap_window_sec),
        };
        if let Some(mut quote) = fetch_one(adapter.clone(), token_id, &params, timeout).await {
            quote.at = now;
            return Some(quote);
        }
    }
    None
}
