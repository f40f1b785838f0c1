// Copyright (c) 2024 Botho Foundation

use crate::ConversionError;

/// Which rates a conversion settles against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RatePolicy {
    /// Settle against the spot rates of the height.
    Spot,
    /// Settle against the worse of spot and trailing average, per side.
    Averaged,
}

/// Convert `amount` of one asset into another.
///
/// Rates are fixed-point USD prices of one smallest unit of each asset. The
/// product `amount * source_rate` is formed in `u128` before dividing, so the
/// result is exact up to the final floor.
///
/// Under [`RatePolicy::Spot`] the averages are ignored and may be zero.
pub fn convert(
    policy: RatePolicy,
    amount: u64,
    from_rate: u64,
    from_avg: u64,
    to_rate: u64,
    to_avg: u64,
) -> Result<u64, ConversionError> {
    if from_rate == 0 || to_rate == 0 {
        return Err(ConversionError::InvalidRate);
    }

    let (source_rate, dest_rate) = match policy {
        RatePolicy::Spot => (from_rate, to_rate),
        RatePolicy::Averaged => {
            if from_avg == 0 || to_avg == 0 {
                return Err(ConversionError::InvalidRate);
            }
            (from_rate.min(from_avg), to_rate.max(to_avg))
        }
    };

    let output = (amount as u128 * source_rate as u128) / dest_rate as u128;
    u64::try_from(output).map_err(|_| ConversionError::Overflow)
}
