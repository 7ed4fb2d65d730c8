//! Polling loop that drives [`super::Aggregator`] for every configured token.
//!
//! A `tokio::time::interval` tick loop, one concurrent task per token, with
//! a [`CancellationToken`] for graceful shutdown instead of running forever.

use super::Aggregator;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Runs `aggregator.consolidate(token_id)` on a fixed interval for every
/// token in `tokens`, one independent task per token so a slow or failing
/// token never delays another's tick.
pub async fn run(
    aggregator: Arc<Aggregator>,
    tokens: Vec<String>,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    let tasks: Vec<_> = tokens
        .into_iter()
        .map(|token_id| {
            let aggregator = aggregator.clone();
            let cancel = cancel.clone();
            tokio::spawn(run_one(aggregator, token_id, poll_interval, cancel))
        })
        .collect();

    for task in tasks {
        let _ = task.await;
    }
}

async fn run_one(
    aggregator: Arc<Aggregator>,
    token_id: String,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(token_id, "aggregator loop shutting down");
                return;
            }
            _ = interval.tick() => {
                match aggregator.consolidate(&token_id, cancel.clone()).await {
                    Ok(cp) => {
                        info!(token_id, price = cp.price, ?cp.mode, "consolidated price updated");
                    }
                    Err(e) => {
                        error!(token_id, %e, "consolidation failed, no price available");
                    }
                }
            }
        }
    }
}
