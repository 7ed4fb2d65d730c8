//! Durable collaborators: Last-Good price store, Intent store, Config repo.
//!
//! Per §10.5, these are specified as traits so a database-backed
//! implementation is a drop-in replacement for the in-process, `dashmap`-backed
//! ones provided here. Both satisfy the same per-key-serialization and
//! uniqueness invariants a real store would.

pub mod config_repo;
pub mod intent_store;
pub mod last_good;

pub use config_repo::{ConfigRepo, TomlConfigRepo};
pub use intent_store::{InMemoryIntentStore, InsertOutcome, IntentStore};
pub use last_good::{InMemoryLastGoodStore, LastGoodStore};
