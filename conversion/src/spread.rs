// Copyright (c) 2024 Botho Foundation

use crate::{convert, ConversionError, RatePolicy};

/// The tolerance band around a market rate is `market / SPREAD_TOLERANCE_FACTOR`.
pub const SPREAD_TOLERANCE_FACTOR: u64 = 100;

/// Raise `average` toward `market` by the tolerance band, never past it.
///
/// The result is the source-side rate of a toleranced quote and is always
/// `<= market`.
pub fn min_tolerance(market: u64, average: u64, factor: u64) -> u64 {
    if average >= market {
        return market;
    }
    let tolerance = market / factor.max(1);
    average.saturating_add(tolerance).min(market)
}

/// Lower `average` toward `market` by the tolerance band, never past it.
///
/// The result is the destination-side rate of a toleranced quote and is
/// always `>= market`.
pub fn max_tolerance(market: u64, average: u64, factor: u64) -> u64 {
    if average <= market {
        return market;
    }
    let tolerance = market / factor.max(1);
    match average.checked_sub(tolerance) {
        Some(lowered) => lowered.max(market),
        None => market,
    }
}

/// The amount a quote loses to the tolerance band.
///
/// Returns `market_conversion - toleranced_conversion`. Both market rates must
/// be non-zero; averages may be zero.
pub fn spread(
    amount: u64,
    from_market: u64,
    from_avg: u64,
    to_market: u64,
    to_avg: u64,
    factor: u64,
) -> Result<u64, ConversionError> {
    let market = convert(RatePolicy::Spot, amount, from_market, 0, to_market, 0)?;

    let source = min_tolerance(from_market, from_avg, factor);
    let dest = max_tolerance(to_market, to_avg, factor);
    let toleranced = (amount as u128 * source as u128) / dest as u128;

    let market = market as u128;
    if toleranced > market {
        return Err(ConversionError::NegativeSpread);
    }
    Ok((market - toleranced) as u64)
}
