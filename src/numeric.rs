//! Pure, integer-only price math.
//!
//! Every price comparison and amount computation in this crate goes through
//! these helpers. Floating point never appears on the path from a raw
//! [`crate::types::Quote`] to a threshold decision or a transfer amount —
//! truncation rules below are the contract, not an approximation of one.

/// Rescale `value` from `from_decimals` to `to_decimals`, truncating toward
/// zero when narrowing. Widening (`to_decimals >= from_decimals`) is exact.
pub fn rescale(value: u128, from_decimals: u8, to_decimals: u8) -> u128 {
    if to_decimals >= from_decimals {
        let shift = (to_decimals - from_decimals) as u32;
        value.saturating_mul(10u128.saturating_pow(shift))
    } else {
        let shift = (from_decimals - to_decimals) as u32;
        value / 10u128.pow(shift)
    }
}

/// Integer median of an already-sorted ascending slice. Even-length inputs
/// average the two middle elements with integer division (truncates toward
/// zero, per the aggregation contract). Panics on an empty slice — callers
/// must not invoke this with fewer than one element.
pub fn median_sorted(sorted: &[u128]) -> u128 {
    assert!(!sorted.is_empty(), "median_sorted requires a non-empty slice");
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        let a = sorted[n / 2 - 1];
        let b = sorted[n / 2];
        // Sum first, then halve: avoids the asymmetric rounding that
        // averaging two independently-truncated halves would introduce.
        (a + b) / 2
    }
}

/// Deviation of `value` from `reference` in basis points, via integer
/// cross-multiplication: `|value - reference| * 10_000 / reference`.
pub fn deviation_bps(value: u128, reference: u128) -> u128 {
    if reference == 0 {
        return 0;
    }
    let diff = value.abs_diff(reference);
    diff.saturating_mul(10_000) / reference
}

/// True when `confidence / price <= epsilon`, compared via integer
/// cross-multiplication against `epsilon` expressed as micros (1e6 scale,
/// so 1% == 10_000).
pub fn confidence_within_epsilon(confidence: u128, price: u128, epsilon_micros: u64) -> bool {
    if price == 0 {
        return false;
    }
    // confidence / price <= epsilon_micros / 1_000_000
    // <=> confidence * 1_000_000 <= price * epsilon_micros
    confidence.saturating_mul(1_000_000) <= price.saturating_mul(epsilon_micros as u128)
}

/// `amount_bps` of `total`, truncated toward zero: `total * bps / 10_000`.
pub fn bps_of(total: u128, bps: u32) -> u128 {
    total.saturating_mul(bps as u128) / 10_000
}

/// Compares a canonical-scale `price` (at `price_decimals`) against a
/// human-scale `threshold_usd` (given as `threshold_units` at
/// `threshold_decimals`, e.g. a `rust_decimal::Decimal` unpacked via
/// `mantissa()`/`scale()`), returning `price >= threshold` without ever
/// converting either side to a float.
///
/// Both sides are rescaled up to the finer of the two decimal scales before
/// comparing, so magnitude is preserved exactly.
pub fn ge_cross_scale(
    price: u128,
    price_decimals: u8,
    threshold_units: u128,
    threshold_decimals: u8,
) -> bool {
    let common = price_decimals.max(threshold_decimals);
    let p = rescale(price, price_decimals, common);
    let t = rescale(threshold_units, threshold_decimals, common);
    p >= t
}

/// Same as [`ge_cross_scale`] but for `<=`.
pub fn le_cross_scale(
    price: u128,
    price_decimals: u8,
    threshold_units: u128,
    threshold_decimals: u8,
) -> bool {
    let common = price_decimals.max(threshold_decimals);
    let p = rescale(price, price_decimals, common);
    let t = rescale(threshold_units, threshold_decimals, common);
    p <= t
}
