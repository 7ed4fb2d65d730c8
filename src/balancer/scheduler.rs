//! Polling loop that drives the [`super::Balancer`] and hands any resulting
//! signals to the [`crate::execution::ExecutionEngine`].
//!
//! Same interval-loop-per-key shape as [`crate::aggregator::scheduler`],
//! generalized from "per token" to "per (token, chain) pair" since rules are
//! scoped to a chain.

use super::Balancer;
use crate::execution::ExecutionEngine;
use crate::store::LastGoodStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub async fn run(
    balancer: Arc<Balancer>,
    last_good: Arc<dyn LastGoodStore>,
    execution_engine: Arc<ExecutionEngine>,
    tokens: Vec<(String, u64)>,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    let tasks: Vec<_> = tokens
        .into_iter()
        .map(|(token_id, chain_id)| {
            let balancer = balancer.clone();
            let last_good = last_good.clone();
            let execution_engine = execution_engine.clone();
            let cancel = cancel.clone();
            tokio::spawn(run_one(
                balancer,
                last_good,
                execution_engine,
                token_id,
                chain_id,
                poll_interval,
                cancel,
            ))
        })
        .collect();

    for task in tasks {
        let _ = task.await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_one(
    balancer: Arc<Balancer>,
    last_good: Arc<dyn LastGoodStore>,
    execution_engine: Arc<ExecutionEngine>,
    token_id: String,
    chain_id: u64,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(token_id, "balancer loop shutting down");
                return;
            }
            _ = interval.tick() => {
                let Some(cp) = last_good.get(&token_id).await else {
                    continue;
                };
                let signals = balancer.evaluate_token(&token_id, chain_id, &cp).await;
                for signal in &signals {
                    match execution_engine.process(signal).await {
                        Ok(intent) => {
                            info!(
                                rule_id = %intent.rule_id,
                                idem_key = %intent.idem_key,
                                ?intent.status,
                                "transfer intent advanced"
                            );
                        }
                        Err(e) => {
                            error!(rule_id = %signal.rule_id, %e, "execution engine failed to process signal");
                        }
                    }
                }
                if signals.is_empty() {
                    tracing::debug!(token_id, "no rule fired this round");
                }
            }
        }
    }
}
