// Copyright (c) 2024 Botho Foundation

//! Query and submission surface over committed ledger state.
//!
//! Every read opens its own LMDB read transaction, so queries never see a
//! half-applied height and never wait on the sync task.

use crate::address::Address;
use crate::batch::{parse_entry, BatchError};
use crate::chain::{ChainClient, ChainError, NewEntry};
use crate::credential::HeightGate;
use crate::ledger::{
    HistoryFilter, HistoryPage, InsufficientBalance, Ledger, LedgerError, RateAverageCache,
};
use crate::params::ProtocolParameters;
use crate::sync::SyncStatus;
use crate::ticker::Ticker;
use parking_lot::Mutex;
use peg_conversion::{convert, spread, ConversionError, SPREAD_TOLERANCE_FACTOR};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Upstream error: {0}")]
    Chain(#[from] ChainError),

    #[error("No {ticker} rate at height {height}")]
    MissingRate { height: u64, ticker: Ticker },

    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),
}

/// Why a submitted batch was turned away before reaching the chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitRejection {
    #[error("{0}")]
    Invalid(#[from] BatchError),

    #[error("{0}")]
    Insufficient(#[from] InsufficientBalance),

    #[error("Entry {0} was already applied")]
    AlreadyApplied(String),
}

/// A signed batch as it will appear on chain.
#[derive(Debug, Clone)]
pub struct RawBatch {
    pub ext_ids: Vec<Vec<u8>>,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncState {
    pub local: Option<u64>,
    pub remote: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Quote {
    pub height: u64,
    pub from: Ticker,
    pub to: Ticker,
    pub amount: u64,
    pub output: u64,
    /// Loss to the tolerance band around the moving average.
    pub spread: u64,
}

pub struct NodeApi {
    ledger: Arc<Ledger>,
    client: Arc<dyn ChainClient>,
    params: Arc<ProtocolParameters>,
    status: Arc<SyncStatus>,
    averages: Mutex<RateAverageCache>,
}

impl NodeApi {
    pub fn new(
        ledger: Arc<Ledger>,
        client: Arc<dyn ChainClient>,
        params: Arc<ProtocolParameters>,
        status: Arc<SyncStatus>,
    ) -> Self {
        let averages = Mutex::new(RateAverageCache::new(params.average_window));
        Self {
            ledger,
            client,
            params,
            status,
            averages,
        }
    }

    pub fn get_balance(&self, address: &Address, ticker: Ticker) -> Result<u64, ApiError> {
        let txn = self.ledger.read_txn()?;
        Ok(self.ledger.balances.get(address, ticker, &txn)?)
    }

    pub fn get_all_balances(&self, address: &Address) -> Result<BTreeMap<Ticker, u64>, ApiError> {
        let txn = self.ledger.read_txn()?;
        Ok(self.ledger.balances.get_all(address, &txn)?)
    }

    pub fn sync_status(&self) -> Result<SyncState, ApiError> {
        Ok(SyncState {
            local: self.ledger.committed_height()?,
            remote: self.status.remote(),
        })
    }

    /// Validate a signed batch against committed state and write it to the
    /// transaction chain. Returns the entry hash on acceptance.
    pub async fn submit_transaction_batch(
        &self,
        raw: RawBatch,
    ) -> Result<Result<String, SubmitRejection>, ApiError> {
        if let Err(rejection) = self.check_submission(&raw)? {
            return Ok(Err(rejection));
        }

        let entry = NewEntry {
            chain: self.params.transaction_chain,
            ext_ids: raw.ext_ids,
            content: raw.content,
        };
        let hash = self.client.submit_entry(&entry).await?;
        let id = hex::encode(hash);
        info!(entry = %id, "Submitted transaction batch");
        Ok(Ok(id))
    }

    fn check_submission(&self, raw: &RawBatch) -> Result<Result<(), SubmitRejection>, ApiError> {
        let txn = self.ledger.read_txn()?;
        let next = self
            .ledger
            .synced_height(&txn)?
            .map_or(self.params.start_height, |h| h + 1);

        let batch = match parse_entry(
            &raw.ext_ids,
            &raw.content,
            &self.params.transaction_chain,
            HeightGate::At(next),
            &self.params,
        ) {
            Ok(batch) => batch,
            Err(e) => return Ok(Err(e.into())),
        };

        let hash = crate::chain::entry_hash(
            &self.params.transaction_chain,
            &raw.ext_ids,
            &raw.content,
        );
        if self.ledger.history.contains(&hash, &txn)? {
            return Ok(Err(SubmitRejection::AlreadyApplied(hex::encode(hash))));
        }

        let mut spent: BTreeMap<Ticker, u64> = BTreeMap::new();
        for tx in &batch.transactions {
            let total = spent.entry(tx.input.ticker).or_insert(0);
            *total = total.saturating_add(tx.input.amount);
            let balance = self
                .ledger
                .balances
                .get(&tx.input.address, tx.input.ticker, &txn)?;
            if *total > balance {
                return Ok(Err(InsufficientBalance {
                    address: tx.input.address,
                    ticker: tx.input.ticker,
                    balance,
                    requested: *total,
                }
                .into()));
            }
        }
        Ok(Ok(()))
    }

    pub fn transaction_history(&self, filter: &HistoryFilter) -> Result<HistoryPage, ApiError> {
        let txn = self.ledger.read_txn()?;
        Ok(self.ledger.history.query(filter, &txn)?)
    }

    /// Largest holders of `ticker`, richest first.
    pub fn rich_list(&self, ticker: Ticker, limit: usize) -> Result<Vec<(Address, u64)>, ApiError> {
        let txn = self.ledger.read_txn()?;
        let mut holders = self.ledger.balances.holders(ticker, &txn)?;
        holders.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        holders.truncate(limit);
        Ok(holders)
    }

    pub fn rates(&self, height: u64) -> Result<BTreeMap<Ticker, u64>, ApiError> {
        let txn = self.ledger.read_txn()?;
        Ok(self.ledger.rates.get_rates(height, &txn)?)
    }

    /// Price a conversion at `height` without touching balances.
    pub fn quote(
        &self,
        height: u64,
        from: Ticker,
        to: Ticker,
        amount: u64,
    ) -> Result<Quote, ApiError> {
        let txn = self.ledger.read_txn()?;
        let rates = self.ledger.rates.get_rates(height, &txn)?;
        let rate = |ticker: Ticker| match rates.get(&ticker) {
            Some(&r) if r > 0 => Ok(r),
            _ => Err(ApiError::MissingRate { height, ticker }),
        };
        let (from_rate, to_rate) = (rate(from)?, rate(to)?);

        let averages = self
            .averages
            .lock()
            .average_rates(&self.ledger.rates, height, &txn)?;
        let from_avg = averages.get(&from).copied().unwrap_or(0);
        let to_avg = averages.get(&to).copied().unwrap_or(0);

        let output = convert(
            self.params.rate_policy(height),
            amount,
            from_rate,
            from_avg,
            to_rate,
            to_avg,
        )?;
        let spread = spread(
            amount,
            from_rate,
            from_avg,
            to_rate,
            to_avg,
            SPREAD_TOLERANCE_FACTOR,
        )?;
        Ok(Quote {
            height,
            from,
            to,
            amount,
            output,
            spread,
        })
    }

    /// Total supply of every ticker that has one.
    pub fn issuance(&self) -> Result<BTreeMap<Ticker, u128>, ApiError> {
        let txn = self.ledger.read_txn()?;
        Ok(self.ledger.balances.totals(&txn)?)
    }
}
