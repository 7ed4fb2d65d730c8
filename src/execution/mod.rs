//! Execution Engine and its outbound Chain Client collaborator.

pub mod chain_client;
pub mod engine;

pub use chain_client::{AlloyChainClient, ChainClient, DryRunChainClient, ReceiptOutcome};
pub use engine::{idem_key, ExecutionEngine};
