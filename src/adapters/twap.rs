//! DEX TWAP adapter (Uniswap-V3-style pools).
//!
//! Reads the pool's tick accumulator over a window via `observe`, averages
//! it to a mean tick, then converts that tick to a price using fixed-point
//! integer arithmetic. This deliberately does NOT use `f64::powi` — the
//! REDESIGN note this adapter replaces called that float path (with a
//! hard-coded fallback price on overflow) a bug, not a contract.

use super::{FetchParams, PriceSourceAdapter};
use crate::contracts::UniswapV3Pool;
use crate::error::NoDataReason;
use crate::types::{Quote, QuoteMeta, SourceTag};
use alloy::primitives::{Address, U256};
use alloy::providers::Provider;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Static facts about one pool the adapter is allowed to read from.
#[derive(Debug, Clone)]
pub struct PoolSpec {
    pub address: Address,
    pub token0_decimals: u8,
    pub token1_decimals: u8,
    /// `true` when the pool's native token1/token0 price must be inverted
    /// to express "USD per unit of the configured token".
    pub invert: bool,
}

pub struct TwapAdapter<P> {
    provider: Arc<P>,
    /// `pool_id -> pool spec`. `pool_id` is the same string that appears in
    /// `TokenCfg::allowed_pools`.
    pools: HashMap<String, PoolSpec>,
}

impl<P: Provider + Send + Sync + 'static> TwapAdapter<P> {
    pub fn new(provider: Arc<P>, pools: HashMap<String, PoolSpec>) -> Self {
        Self { provider, pools }
    }
}

#[async_trait]
impl<P: Provider + Send + Sync + 'static> PriceSourceAdapter for TwapAdapter<P> {
    fn source_tag(&self) -> SourceTag {
        SourceTag::UniswapV3Twap
    }

    async fn fetch(&self, token_id: &str, params: &FetchParams) -> Result<Quote, NoDataReason> {
        let pool_id = params.pool_id.as_ref().ok_or(NoDataReason::PoolNotAllowed)?;
        let window_sec = params.window_sec.ok_or(NoDataReason::WindowUnavailable)?;

        let spec = self
            .pools
            .get(pool_id)
            .ok_or(NoDataReason::PoolNotAllowed)?;

        let pool = UniswapV3Pool::new(spec.address, self.provider.clone());

        let liquidity = pool
            .liquidity()
            .call()
            .await
            .map_err(|_| NoDataReason::NetworkFailure)?;

        let window_i64 = i64::try_from(window_sec).map_err(|_| NoDataReason::WindowUnavailable)?;
        let seconds_agos = vec![window_i64 as u32, 0u32];

        let observation = pool
            .observe(seconds_agos)
            .call()
            .await
            .map_err(|_| NoDataReason::WindowUnavailable)?;

        let tick_cumulatives = observation.tickCumulatives;
        if tick_cumulatives.len() != 2 {
            return Err(NoDataReason::MalformedPayload);
        }
        let tc0 = i64::try_from(tick_cumulatives[0]).map_err(|_| NoDataReason::MalformedPayload)?;
        let tc1 = i64::try_from(tick_cumulatives[1]).map_err(|_| NoDataReason::MalformedPayload)?;

        let delta = tc1 - tc0;
        let mean_tick = i32::try_from(delta / window_sec as i64)
            .map_err(|_| NoDataReason::MalformedPayload)?;

        let price = price_from_tick(mean_tick, spec.token0_decimals, spec.token1_decimals, spec.invert)
            .ok_or(NoDataReason::MalformedPayload)?;

        Ok(Quote {
            source: SourceTag::UniswapV3Twap,
            token_id: token_id.to_string(),
            price,
            decimals: 18,
            at: 0, // stamped with wall-clock `now` by the caller; a TWAP has no single observation instant
            meta: QuoteMeta::Twap {
                pool_id: pool_id.clone(),
                window_sec,
                liquidity_metric: liquidity as u128,
            },
        })
    }
}

/// `1.0001^tick`, expressed as a Q64.96 fixed-point `sqrtPriceX96`-style
/// ratio built by repeated squaring over precomputed per-bit constants —
/// the same bit-decomposition technique Uniswap V3's own tick math uses for
/// `getSqrtRatioAtTick`, reimplemented here over `alloy::primitives::U256`
/// so no floating point appears on the path from tick to price.
fn sqrt_ratio_x96_at_tick(tick: i32) -> Option<U256> {
    const MAX_TICK: i32 = 887_272;
    if tick < -MAX_TICK || tick > MAX_TICK {
        return None;
    }
    let abs_tick = tick.unsigned_abs();

    const BIT_CONSTANTS: [u128; 19] = [
        0xfffcb933bd6fad37aa2d162d1a594001,
        0xfff97272373d413259a46990580e213a,
        0xfff2e50f5f656932ef12357cf3c7fdcc,
        0xffe5caca7e10e4e61c3624eaa0941cd0,
        0xffcb9843d60f6159c9db58835c926644,
        0xff973b41fa98c081472e6896dfb254c0,
        0xff2ea16466c96a3843ec78b326b52861,
        0xfe5dee046a99a2a811c461f1969c3053,
        0xfcbe86c7900a88aedcffc83b479aa3a4,
        0xf987a7253ac413176f2b074cf7815e54,
        0xf3392b0822b70005940c7a398e4b70f3,
        0xe7159475a2c29b7443b29c7fa6e889d9,
        0xd097f3bdfd2022b8845ad8f792aa5825,
        0xa9f746462d870fdf8a65dc1f90e061e5,
        0x70d869a156d2a1b890bb3df62baf32f7,
        0x31be135f97d08fd981231505542fcfa6,
        0x09aa508b5b7a84e1c677de54f3e99bc9,
        0x05d6af8dedb81196699c329225ee604,
        0x02216e584f5fa1ea926041bedfe98,
    ];

    let mut ratio: U256 = if abs_tick & 0x1 != 0 {
        U256::from(BIT_CONSTANTS[0])
    } else {
        U256::from(1u128) << 128
    };

    for (i, constant) in BIT_CONSTANTS.iter().enumerate().skip(1) {
        if abs_tick & (1 << i) != 0 {
            ratio = (ratio * U256::from(*constant)) >> 128;
        }
    }

    if tick > 0 {
        ratio = U256::MAX / ratio;
    }

    // Shift from Q128.128 down to Q64.96.
    Some(ratio >> 32)
}

/// Converts a pool's mean tick into a USD-scale price at
/// [`crate::types::CANONICAL_DECIMALS`] decimals, adjusting for the two
/// tokens' own decimals and, if `invert`, flipping the ratio.
fn price_from_tick(tick: i32, token0_decimals: u8, token1_decimals: u8, invert: bool) -> Option<u128> {
    let sqrt_price_x96 = sqrt_ratio_x96_at_tick(tick)?;

    // price(token1 per token0) = (sqrtPriceX96^2 / 2^192) * 10^(token0_decimals - token1_decimals)
    // Rearranged to keep everything as integer multiply-then-shift:
    //   numerator = sqrtPriceX96^2 * 10^(CANONICAL_DECIMALS + token0_decimals)
    //   price     = numerator >> 192 / 10^token1_decimals
    let canonical = crate::types::CANONICAL_DECIMALS as u32;
    let scale_up = canonical + token0_decimals as u32;
    let numerator = sqrt_price_x96
        .checked_mul(sqrt_price_x96)?
        .checked_mul(U256::from(10u128).checked_pow(U256::from(scale_up))?)?;
    let shifted = numerator >> 192;
    let scale_down = U256::from(10u128).checked_pow(U256::from(token1_decimals as u32))?;
    let price_token1_per_token0: U256 = shifted / scale_down;

    let price = if invert {
        if price_token1_per_token0.is_zero() {
            return None;
        }
        let one = U256::from(10u128).checked_pow(U256::from(2 * canonical))?;
        one / price_token1_per_token0
    } else {
        price_token1_per_token0
    };

    u128::try_from(price).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_zero_is_price_one_scaled() {
        // At tick 0, sqrtPriceX96 == 2^96, so token1/token0 == 1.0 exactly,
        // adjusted only by the decimals difference (both 18 here).
        let price = price_from_tick(0, 18, 18, false).unwrap();
        let one = 10u128.pow(crate::types::CANONICAL_DECIMALS as u32);
        // Integer-truncated fixed point is not bit-exact at the extreme
        // precision, but must round to within a few wei of parity.
        let diff = price.abs_diff(one);
        assert!(diff < 10, "expected ~1.0, got {price} (diff {diff})");
    }

    #[test]
    fn positive_and_negative_ticks_are_reciprocal_ish() {
        let up = price_from_tick(1000, 18, 18, false).unwrap();
        let down = price_from_tick(-1000, 18, 18, false).unwrap();
        // up * down should be close to 1.0 at canonical scale (within integer
        // truncation error), since 1.0001^1000 * 1.0001^-1000 == 1.
        let one = 10u128.pow(crate::types::CANONICAL_DECIMALS as u32);
        let product = (up / 10u128.pow(9)) * (down / 10u128.pow(9));
        let diff = product.abs_diff(one);
        assert!(diff < one / 1_000, "product {product} too far from {one}");
    }

    #[test]
    fn out_of_range_tick_returns_none() {
        assert!(sqrt_ratio_x96_at_tick(10_000_000).is_none());
    }

    #[test]
    fn invert_flips_the_ratio() {
        let forward = price_from_tick(500, 6, 18, false).unwrap();
        let inverted = price_from_tick(500, 6, 18, true).unwrap();
        assert_ne!(forward, inverted);
    }
}
