// Copyright (c) 2024 Botho Foundation

//! Height-gated protocol parameters.
//!
//! [`ProtocolParameters`] is an immutable value built once at startup and
//! shared behind an `Arc`. Every height-dependent rule asks it instead of
//! consulting global state, so tests can build a network where every rule is
//! active from an arbitrary height with [`ProtocolParameters::with_all_activations_at`].

use crate::chain::{chain_id, ChainId};
use crate::ticker::{Ticker, TickerTier};
use peg_conversion::RatePolicy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The logic version implemented by this build. Recorded for every synced
/// height and compared against the hard-fork list on startup.
pub const LOGIC_VERSION: u32 = 5;

/// Smallest units per whole asset.
pub const COIN: u64 = 100_000_000;

/// Trailing window for rate averaging, in heights. Must be even and at
/// least 2: an average needs `window / 2` non-zero samples.
pub const AVERAGE_WINDOW: u64 = 288;

/// Per-height cap on conversions into PEG.
pub const BANK_CAP: u64 = 5_000 * COIN;

/// PEG paid to each winning oracle submission.
pub const COINBASE_REWARD: u64 = 200 * COIN;

/// A consensus rule switched on at a height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Activation {
    /// Second-generation grading.
    GraderV2,
    /// Transaction chain and PEG pricing go live.
    Transactions,
    /// PEG floats against the market instead of a fixed formula.
    FreeFloatingPeg,
    /// Second ticker tier and grader v4.
    V4Assets,
    /// Conversions settle against trailing averages.
    RateAveraging,
    /// Conversions into PEG are capped per height.
    ConversionBank,
    /// Third ticker tier and grader v5.
    V5Assets,
    /// secp256k1 redeem conditions are accepted.
    RcdE,
}

/// Oracle grading algorithm variant in force at a height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GraderVersion {
    V1,
    V2,
    V3,
    V4,
    V5,
}

/// A height at which nodes must run at least `min_version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardFork {
    pub height: u64,
    pub min_version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamsError {
    #[error("Average window must be even and at least 2, got {0}")]
    AverageWindow(u64),
}

#[derive(Debug, Clone)]
pub struct ProtocolParameters {
    /// First height the node applies.
    pub start_height: u64,
    pub grader_v2: u64,
    pub transactions: u64,
    pub free_floating_peg: u64,
    pub v4_assets: u64,
    pub rate_averaging: u64,
    pub conversion_bank: u64,
    pub v5_assets: u64,
    pub rcd_e: u64,
    /// See [`AVERAGE_WINDOW`]. Checked by [`ProtocolParameters::validate`].
    pub average_window: u64,
    pub bank_cap: u64,
    pub coinbase_reward: u64,
    pub oracle_chain: ChainId,
    pub transaction_chain: ChainId,
    pub hard_forks: Vec<HardFork>,
}

impl ProtocolParameters {
    pub fn mainnet() -> Self {
        let mut params = Self {
            start_height: 206_421,
            grader_v2: 210_330,
            transactions: 213_237,
            free_floating_peg: 222_270,
            v4_assets: 231_620,
            rate_averaging: 240_470,
            conversion_bank: 240_470,
            v5_assets: 246_210,
            rcd_e: 246_210,
            average_window: AVERAGE_WINDOW,
            bank_cap: BANK_CAP,
            coinbase_reward: COINBASE_REWARD,
            oracle_chain: chain_id(&[b"PegNet", b"MainNet", b"OraclePriceRecords"]),
            transaction_chain: chain_id(&[b"pegnet", b"transactions"]),
            hard_forks: Vec::new(),
        };
        params.hard_forks = vec![
            HardFork { height: params.transactions, min_version: 2 },
            HardFork { height: params.v4_assets, min_version: 3 },
            HardFork { height: params.rate_averaging, min_version: 4 },
            HardFork { height: params.v5_assets, min_version: 5 },
        ];
        params
    }

    /// Every activation at `height`, syncing from `height`. The hard-fork
    /// list requires the current logic version from that height on.
    pub fn with_all_activations_at(height: u64) -> Self {
        Self {
            start_height: height,
            grader_v2: height,
            transactions: height,
            free_floating_peg: height,
            v4_assets: height,
            rate_averaging: height,
            conversion_bank: height,
            v5_assets: height,
            rcd_e: height,
            hard_forks: vec![HardFork { height, min_version: LOGIC_VERSION }],
            ..Self::mainnet()
        }
    }

    /// Reject parameter sets the ledger rules cannot work with.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.average_window < 2 || self.average_window % 2 != 0 {
            return Err(ParamsError::AverageWindow(self.average_window));
        }
        Ok(())
    }

    pub fn activation_height(&self, activation: Activation) -> u64 {
        match activation {
            Activation::GraderV2 => self.grader_v2,
            Activation::Transactions => self.transactions,
            Activation::FreeFloatingPeg => self.free_floating_peg,
            Activation::V4Assets => self.v4_assets,
            Activation::RateAveraging => self.rate_averaging,
            Activation::ConversionBank => self.conversion_bank,
            Activation::V5Assets => self.v5_assets,
            Activation::RcdE => self.rcd_e,
        }
    }

    pub fn is_active(&self, activation: Activation, height: u64) -> bool {
        height >= self.activation_height(activation)
    }

    pub fn grader_version(&self, height: u64) -> GraderVersion {
        if self.is_active(Activation::V5Assets, height) {
            GraderVersion::V5
        } else if self.is_active(Activation::V4Assets, height) {
            GraderVersion::V4
        } else if self.is_active(Activation::FreeFloatingPeg, height) {
            GraderVersion::V3
        } else if self.is_active(Activation::GraderV2, height) {
            GraderVersion::V2
        } else {
            GraderVersion::V1
        }
    }

    pub fn rate_policy(&self, height: u64) -> RatePolicy {
        if self.is_active(Activation::RateAveraging, height) {
            RatePolicy::Averaged
        } else {
            RatePolicy::Spot
        }
    }

    /// The PEG conversion cap at `height`, if the bank is active.
    pub fn bank_cap_at(&self, height: u64) -> Option<u64> {
        self.is_active(Activation::ConversionBank, height)
            .then_some(self.bank_cap)
    }

    pub fn ticker_active(&self, ticker: Ticker, height: u64) -> bool {
        match ticker.tier() {
            TickerTier::Genesis => true,
            TickerTier::V4 => self.is_active(Activation::V4Assets, height),
            TickerTier::V5 => self.is_active(Activation::V5Assets, height),
        }
    }

    /// Tickers that may be priced or transacted at `height`.
    pub fn active_tickers(&self, height: u64) -> impl Iterator<Item = Ticker> + '_ {
        Ticker::ALL
            .iter()
            .copied()
            .filter(move |t| self.ticker_active(*t, height))
    }
}
