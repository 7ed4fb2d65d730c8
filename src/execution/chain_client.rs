//! Outbound contract with the blockchain: balance reads, transfer broadcast,
//! receipt confirmation.
//!
//! Holds a wallet-filled `alloy` provider built via
//! `ProviderBuilder::new().wallet(signer).connect_http(...)`.

use crate::contracts::IERC20;
use crate::error::TreasuryError;
use crate::types::TransferIntent;
use alloy::consensus::Transaction as TransactionTrait;
use alloy::network::TransactionResponse;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::Provider;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

/// How many recent blocks [`AlloyChainClient::find_pending_tx`] scans when
/// reconciling a recovered `Planned` intent. Wide enough to cover the window
/// between a broadcast returning and its hash being durably recorded, without
/// walking the whole chain.
const RECONCILE_LOOKBACK_BLOCKS: u64 = 50;

/// Outcome of polling a transaction receipt. `NotYet` is not an error —
/// the caller leaves the intent `Submitted` and tries again later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptOutcome {
    Success,
    Failed,
    NotYet,
}

/// Minimal blockchain contract the engine needs: balance, broadcast, receipt.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn get_balance(&self, owner: Address, token_id: &str, chain_id: u64) -> Result<u128, TreasuryError>;

    /// Broadcast `intent`'s transfer. Returns the tx hash on success; the
    /// caller persists it to the Intent store before awaiting a receipt.
    async fn broadcast(&self, intent: &TransferIntent) -> Result<String, TreasuryError>;

    async fn await_receipt(&self, tx_hash: &str, timeout: Duration) -> Result<ReceiptOutcome, TreasuryError>;

    /// Look back over recent chain state for a transfer matching `intent`'s
    /// sender, destination, token and amount. Called before a recovered
    /// `Planned` intent broadcasts, so a transaction that already went out in
    /// a prior process that crashed before recording it doesn't go out twice.
    async fn find_pending_tx(&self, intent: &TransferIntent) -> Result<Option<String>, TreasuryError>;
}

/// `alloy`-backed [`ChainClient`]. One instance per chain; `token_addresses`
/// resolves a `TokenCfg.token_id` to the ERC-20 contract that actually holds
/// the balance, since the registry identifies tokens by symbol.
pub struct AlloyChainClient<P: Provider + Clone + Send + Sync + 'static> {
    provider: P,
    token_addresses: HashMap<String, Address>,
}

impl<P: Provider + Clone + Send + Sync + 'static> AlloyChainClient<P> {
    pub fn new(provider: P, token_addresses: HashMap<String, Address>) -> Self {
        Self {
            provider,
            token_addresses,
        }
    }

    fn token_address(&self, token_id: &str) -> Result<Address, TreasuryError> {
        self.token_addresses
            .get(token_id)
            .copied()
            .ok_or_else(|| TreasuryError::ConfigMissing {
                token_id: token_id.to_string(),
            })
    }
}

#[async_trait]
impl<P: Provider + Clone + Send + Sync + 'static> ChainClient for AlloyChainClient<P> {
    async fn get_balance(&self, owner: Address, token_id: &str, _chain_id: u64) -> Result<u128, TreasuryError> {
        let token = self.token_address(token_id)?;
        let erc20 = IERC20::new(token, self.provider.clone());
        erc20
            .balanceOf(owner)
            .call()
            .await
            .map(|balance| balance.to::<u128>())
            .map_err(|e| TreasuryError::TransientChainError(e.to_string()))
    }

    async fn broadcast(&self, intent: &TransferIntent) -> Result<String, TreasuryError> {
        let token = self.token_address(&intent.token_id)?;
        let erc20 = IERC20::new(token, self.provider.clone());
        let amount = U256::from(intent.amount_units);

        let pending = erc20
            .transfer(intent.to, amount)
            .send()
            .await
            .map_err(classify_send_error)?;

        Ok(format!("{:?}", pending.tx_hash()))
    }

    async fn await_receipt(&self, tx_hash: &str, timeout: Duration) -> Result<ReceiptOutcome, TreasuryError> {
        let hash: B256 = tx_hash
            .parse()
            .map_err(|_| TreasuryError::TerminalChainError(format!("malformed tx hash: {tx_hash}")))?;

        match tokio::time::timeout(timeout, self.provider.get_transaction_receipt(hash)).await {
            Ok(Ok(Some(receipt))) => Ok(if receipt.status() {
                ReceiptOutcome::Success
            } else {
                ReceiptOutcome::Failed
            }),
            Ok(Ok(None)) => Ok(ReceiptOutcome::NotYet),
            Ok(Err(e)) => Err(TreasuryError::TransientChainError(e.to_string())),
            Err(_) => Ok(ReceiptOutcome::NotYet),
        }
    }

    async fn find_pending_tx(&self, intent: &TransferIntent) -> Result<Option<String>, TreasuryError> {
        let token = self.token_address(&intent.token_id)?;
        let amount = U256::from(intent.amount_units);

        let latest = self
            .provider
            .get_block_number()
            .await
            .map_err(|e| TreasuryError::TransientChainError(e.to_string()))?;
        let from_block = latest.saturating_sub(RECONCILE_LOOKBACK_BLOCKS);

        for block_num in (from_block..=latest).rev() {
            let block = self
                .provider
                .get_block_by_number(block_num.into())
                .full()
                .await
                .map_err(|e| TreasuryError::TransientChainError(e.to_string()))?;
            let Some(block) = block else { continue };

            for tx in block.transactions.txns() {
                if tx.from() != intent.from || tx.to() != Some(token) {
                    continue;
                }
                let Ok(call) = IERC20::transferCall::abi_decode(tx.input()) else {
                    continue;
                };
                if call.to == intent.to && call.amount == amount {
                    return Ok(Some(format!("{:?}", tx.tx_hash())));
                }
            }
        }

        Ok(None)
    }
}

/// Tx hash prefix [`DryRunChainClient`] hands back in place of a real
/// broadcast hash, so `await_receipt` can recognize it and short-circuit
/// instead of asking the chain about a transaction that was never sent.
const DRY_RUN_TX_PREFIX: &str = "dryrun:";

/// Non-broadcasting [`ChainClient`] wired in for `--dry-run`. Reads
/// (`get_balance`, `find_pending_tx`) go to the wrapped real client so
/// dry-run logs reflect actual chain state; `broadcast` never sends a
/// transaction — it logs what would have gone out and returns a synthetic
/// hash, so the Execution Engine's state machine still drives the intent to
/// `Submitted` and then `MinedSuccess` without touching the chain.
pub struct DryRunChainClient<C: ChainClient> {
    inner: C,
}

impl<C: ChainClient> DryRunChainClient<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<C: ChainClient> ChainClient for DryRunChainClient<C> {
    async fn get_balance(&self, owner: Address, token_id: &str, chain_id: u64) -> Result<u128, TreasuryError> {
        self.inner.get_balance(owner, token_id, chain_id).await
    }

    async fn broadcast(&self, intent: &TransferIntent) -> Result<String, TreasuryError> {
        let tx_hash = format!("{DRY_RUN_TX_PREFIX}{}", intent.idem_key);
        info!(
            idem_key = %intent.idem_key,
            from = %intent.from,
            to = %intent.to,
            token_id = %intent.token_id,
            amount_units = intent.amount_units,
            %tx_hash,
            "dry-run: would broadcast transfer, not sending"
        );
        Ok(tx_hash)
    }

    async fn await_receipt(&self, tx_hash: &str, timeout: Duration) -> Result<ReceiptOutcome, TreasuryError> {
        if tx_hash.starts_with(DRY_RUN_TX_PREFIX) {
            return Ok(ReceiptOutcome::Success);
        }
        self.inner.await_receipt(tx_hash, timeout).await
    }

    async fn find_pending_tx(&self, intent: &TransferIntent) -> Result<Option<String>, TreasuryError> {
        self.inner.find_pending_tx(intent).await
    }
}

/// Classifies a broadcast failure as transient (worth retrying within the
/// same intent) or terminal (insufficient funds, bad nonce floor — retrying
/// cannot help). Matches on the error text since `alloy`'s contract-call
/// error doesn't expose a structured reason code for node-level rejections.
fn classify_send_error(e: impl std::fmt::Display) -> TreasuryError {
    let msg = e.to_string();
    let lower = msg.to_lowercase();
    if lower.contains("insufficient funds")
        || lower.contains("nonce too low")
        || lower.contains("gas required exceeds")
        || lower.contains("execution reverted")
    {
        TreasuryError::TerminalChainError(msg)
    } else {
        TreasuryError::TransientChainError(msg)
    }
}
