//! Last-Good price store: `tokenId -> ConsolidatedPrice`, at-most-one writer
//! per token.
//!
//! `Arc<DashMap<K, V>>`, cloned cheaply via `Arc::clone`, extended with a
//! per-key async mutex so writers serialize without a process-wide lock —
//! the store behaves like a keyed actor per token rather than one global
//! lock.

use crate::error::TreasuryError;
use crate::types::ConsolidatedPrice;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Read/write contract for the Last-Good store (§6).
#[async_trait]
pub trait LastGoodStore: Send + Sync {
    async fn get(&self, token_id: &str) -> Option<ConsolidatedPrice>;
    async fn put(&self, token_id: &str, price: ConsolidatedPrice) -> Result<(), TreasuryError>;
}

/// In-process implementation backed by a concurrent map, with a per-token
/// mutex guaranteeing at-most-one writer per token at any time. System-wide
/// parallelism across tokens is unaffected — different tokens never contend.
#[derive(Clone)]
pub struct InMemoryLastGoodStore {
    rows: Arc<DashMap<String, ConsolidatedPrice>>,
    write_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl InMemoryLastGoodStore {
    pub fn new() -> Self {
        Self {
            rows: Arc::new(DashMap::new()),
            write_locks: Arc::new(DashMap::new()),
        }
    }

    fn lock_for(&self, token_id: &str) -> Arc<Mutex<()>> {
        self.write_locks
            .entry(token_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

impl Default for InMemoryLastGoodStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LastGoodStore for InMemoryLastGoodStore {
    async fn get(&self, token_id: &str) -> Option<ConsolidatedPrice> {
        self.rows.get(token_id).map(|entry| entry.clone())
    }

    async fn put(&self, token_id: &str, price: ConsolidatedPrice) -> Result<(), TreasuryError> {
        let lock = self.lock_for(token_id);
        let _guard = lock.lock().await;
        self.rows.insert(token_id.to_string(), price);
        Ok(())
    }
}
