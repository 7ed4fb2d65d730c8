//! Price source adapters.
//!
//! Each adapter speaks one external protocol and normalizes its response
//! into a [`Quote`]. An adapter never surfaces an error across this
//! boundary for an ordinary miss — network failure, unknown symbol, a
//! malformed payload, or a non-positive price are all reported as `NoData`,
//! which the Aggregator treats as "this source did not vote this round",
//! not a failure.

pub mod chainlink;
pub mod pyth;
pub mod twap;

use crate::error::NoDataReason;
use crate::types::{Quote, SourceTag};
use async_trait::async_trait;

/// Per-source fetch parameters that don't fit on `TokenCfg` alone, e.g. the
/// specific pool a TWAP adapter should read from this call.
#[derive(Debug, Clone, Default)]
pub struct FetchParams {
    pub pool_id: Option<String>,
    pub window_sec: Option<u64>,
}

/// Contract every price source adapter implements.
///
/// Modeled on the `Collector<E>` trait the rest of this codebase's event
/// pipelines use: a `Send + Sync` async trait object the Aggregator holds
/// one boxed instance of per configured source.
#[async_trait]
pub trait PriceSourceAdapter: Send + Sync {
    fn source_tag(&self) -> SourceTag;

    async fn fetch(&self, token_id: &str, params: &FetchParams) -> Result<Quote, NoDataReason>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysMiss;

    #[async_trait]
    impl PriceSourceAdapter for AlwaysMiss {
        fn source_tag(&self) -> SourceTag {
            SourceTag::Chainlink
        }

        async fn fetch(&self, _token_id: &str, _params: &FetchParams) -> Result<Quote, NoDataReason> {
            Err(NoDataReason::UnknownSymbol)
        }
    }

    #[tokio::test]
    async fn adapter_trait_object_is_usable_dynamically() {
        let adapter: Box<dyn PriceSourceAdapter> = Box::new(AlwaysMiss);
        let result = adapter.fetch("ETH", &FetchParams::default()).await;
        assert!(matches!(result, Err(NoDataReason::UnknownSymbol)));
    }
}
