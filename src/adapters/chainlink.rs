//! Direct-publisher adapter (Chainlink-style `latestRoundData`).

use super::{FetchParams, PriceSourceAdapter};
use crate::contracts::AggregatorV3Interface;
use crate::error::NoDataReason;
use crate::types::{Quote, QuoteMeta, SourceTag};
use alloy::primitives::Address;
use alloy::providers::Provider;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Reads one configured `AggregatorV3Interface` feed per token.
pub struct ChainlinkAdapter<P> {
    provider: Arc<P>,
    /// `token_id -> feed address` registry, loaded from runtime config.
    feeds: HashMap<String, Address>,
}

impl<P: Provider + Send + Sync + 'static> ChainlinkAdapter<P> {
    pub fn new(provider: Arc<P>, feeds: HashMap<String, Address>) -> Self {
        Self { provider, feeds }
    }
}

#[async_trait]
impl<P: Provider + Send + Sync + 'static> PriceSourceAdapter for ChainlinkAdapter<P> {
    fn source_tag(&self) -> SourceTag {
        SourceTag::Chainlink
    }

    async fn fetch(&self, token_id: &str, _params: &FetchParams) -> Result<Quote, NoDataReason> {
        let feed_addr = *self
            .feeds
            .get(token_id)
            .ok_or(NoDataReason::UnknownSymbol)?;

        let feed = AggregatorV3Interface::new(feed_addr, self.provider.clone());

        let decimals = feed
            .decimals()
            .call()
            .await
            .map_err(|_| NoDataReason::NetworkFailure)?;

        let round = feed
            .latestRoundData()
            .call()
            .await
            .map_err(|_| NoDataReason::NetworkFailure)?;

        if round.answer <= alloy::primitives::I256::ZERO {
            return Err(NoDataReason::NonPositivePrice);
        }
        if round.updatedAt.is_zero() {
            return Err(NoDataReason::MalformedPayload);
        }

        let price: u128 = u128::try_from(round.answer).map_err(|_| NoDataReason::MalformedPayload)?;
        let at: i64 = u64::try_from(round.updatedAt)
            .map_err(|_| NoDataReason::MalformedPayload)? as i64;

        Ok(Quote {
            source: SourceTag::Chainlink,
            token_id: token_id.to_string(),
            price,
            decimals,
            at,
            meta: QuoteMeta::None,
        })
    }
}
