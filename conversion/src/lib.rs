// Copyright (c) 2024 Botho Foundation

//! Conversion arithmetic for the pegged-asset ledger.
//!
//! Everything in this crate is consensus-critical: given identical inputs,
//! every node must produce bit-identical outputs. All arithmetic is integer
//! only, with `u128` intermediates so `amount * rate` can never wrap.
//!
//! ## Rate Policies
//!
//! | Policy   | Source rate              | Destination rate         |
//! |----------|--------------------------|--------------------------|
//! | Spot     | `from_rate`              | `to_rate`                |
//! | Averaged | `min(from_rate, from_avg)` | `max(to_rate, to_avg)` |
//!
//! The averaged policy always prices the conversion against the converter,
//! so a converter can never profit from the gap between the spot rate and
//! the trailing average.
//!
//! ## Quoting
//!
//! [`spread`] reports how much a quote loses to the tolerance band around the
//! moving average. It is used for display only and never touches balances.

mod convert;
mod spread;

pub use convert::{convert, RatePolicy};
pub use spread::{max_tolerance, min_tolerance, spread, SPREAD_TOLERANCE_FACTOR};

use thiserror::Error;

/// Errors from conversion arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConversionError {
    /// A rate (spot or average) required by the policy was zero.
    #[error("Invalid rate: a required rate is zero")]
    InvalidRate,

    /// The converted amount does not fit in a `u64`.
    #[error("Conversion result overflows u64")]
    Overflow,

    /// The toleranced conversion exceeded the market conversion.
    #[error("Toleranced conversion exceeds market conversion")]
    NegativeSpread,
}
