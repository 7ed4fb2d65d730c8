//! Publisher-aggregated adapter (Pyth-style REST price feed).
//!
//! Speaks the `/v2/updates/price/latest` Hermes-style JSON shape: a price
//! as a signed mantissa plus a negative exponent, and a confidence interval
//! reported on the same scale.

use super::{FetchParams, PriceSourceAdapter};
use crate::error::NoDataReason;
use crate::types::{Quote, QuoteMeta, SourceTag};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct PythResponse {
    parsed: Vec<PythParsedPrice>,
}

#[derive(Debug, Deserialize)]
struct PythParsedPrice {
    price: PythPrice,
}

#[derive(Debug, Deserialize)]
struct PythPrice {
    price: String,
    conf: String,
    expo: i32,
    publish_time: i64,
}

pub struct PythAdapter {
    client: reqwest::Client,
    base_url: String,
    /// `token_id -> feed id` registry (Pyth identifies feeds by a hex id,
    /// not a symbol).
    feed_ids: HashMap<String, String>,
}

impl PythAdapter {
    pub fn new(base_url: String, feed_ids: HashMap<String, String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("reqwest client with a fixed timeout always builds");
        Self {
            client,
            base_url,
            feed_ids,
        }
    }
}

#[async_trait]
impl PriceSourceAdapter for PythAdapter {
    fn source_tag(&self) -> SourceTag {
        SourceTag::Pyth
    }

    async fn fetch(&self, token_id: &str, _params: &FetchParams) -> Result<Quote, NoDataReason> {
        let feed_id = self
            .feed_ids
            .get(token_id)
            .ok_or(NoDataReason::UnknownSymbol)?;

        let url = format!(
            "{}/v2/updates/price/latest?ids[]={}",
            self.base_url.trim_end_matches('/'),
            feed_id
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|_| NoDataReason::NetworkFailure)?;

        if !resp.status().is_success() {
            return Err(NoDataReason::NetworkFailure);
        }

        let body: PythResponse = resp
            .json()
            .await
            .map_err(|_| NoDataReason::MalformedPayload)?;

        let parsed = body
            .parsed
            .into_iter()
            .next()
            .ok_or(NoDataReason::MalformedPayload)?;

        decode_pyth_price(token_id, parsed.price)
    }
}

fn decode_pyth_price(token_id: &str, p: PythPrice) -> Result<Quote, NoDataReason> {
    let raw_price: i128 = p.price.parse().map_err(|_| NoDataReason::MalformedPayload)?;
    let raw_conf: u128 = p.conf.parse().map_err(|_| NoDataReason::MalformedPayload)?;

    if raw_price <= 0 {
        return Err(NoDataReason::NonPositivePrice);
    }
    if p.expo > 0 {
        // Pyth exponents are conventionally non-positive; a positive one
        // would mean the mantissa needs scaling up rather than down, which
        // none of our configured feeds do.
        return Err(NoDataReason::MalformedPayload);
    }

    let decimals: u8 = (-p.expo) as u8;

    Ok(Quote {
        source: SourceTag::Pyth,
        token_id: token_id.to_string(),
        price: raw_price as u128,
        decimals,
        at: p.publish_time,
        meta: QuoteMeta::Confidence {
            confidence: raw_conf,
        },
    })
}
