// Copyright (c) 2024 Botho Foundation

//! Oracle rates, grade records and trailing rate averages.

use super::{decode_u64, height_key, LedgerError};
use crate::chain::Winner;
use crate::ticker::Ticker;
use lmdb::{Cursor, Database, DatabaseFlags, Environment, RwTransaction, Transaction, WriteFlags};
use std::collections::BTreeMap;
use tracing::debug;

/// height (8 BE) || ticker code (1) -> u64 LE
pub const RATES_DB_NAME: &str = "rates";
/// height (8 BE) -> JSON winners
pub const GRADES_DB_NAME: &str = "grades";

fn rate_key(height: u64, ticker: Ticker) -> [u8; 9] {
    let mut key = [0u8; 9];
    key[..8].copy_from_slice(&height_key(height));
    key[8] = ticker.code();
    key
}

/// Winning rates per height. Written once per height, never changed.
#[derive(Clone)]
pub struct RateStore {
    rates: Database,
}

impl RateStore {
    pub fn new(env: &Environment) -> Result<Self, LedgerError> {
        Ok(RateStore {
            rates: env.open_db(Some(RATES_DB_NAME))?,
        })
    }

    pub fn create(env: &Environment) -> Result<(), LedgerError> {
        env.create_db(Some(RATES_DB_NAME), DatabaseFlags::empty())?;
        Ok(())
    }

    pub fn insert_rates(
        &self,
        height: u64,
        rates: &BTreeMap<Ticker, u64>,
        db_transaction: &mut RwTransaction,
    ) -> Result<(), LedgerError> {
        for (&ticker, rate) in rates {
            match db_transaction.put(
                self.rates,
                &rate_key(height, ticker),
                &rate.to_le_bytes(),
                WriteFlags::NO_OVERWRITE,
            ) {
                Ok(()) => {}
                Err(lmdb::Error::KeyExist) => {
                    return Err(LedgerError::Corrupt {
                        table: RATES_DB_NAME,
                        reason: format!("{ticker} rate at height {height} already written"),
                    })
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Rates recorded at `height`. Empty if the height had no oracle data.
    pub fn get_rates(
        &self,
        height: u64,
        db_transaction: &impl Transaction,
    ) -> Result<BTreeMap<Ticker, u64>, LedgerError> {
        let prefix = height_key(height);
        let mut result = BTreeMap::new();
        let mut cursor = db_transaction.open_ro_cursor(self.rates)?;
        for item in cursor.iter_from(prefix) {
            let (key, value) = item?;
            if key.len() != 9 || key[..8] != prefix {
                break;
            }
            if let Some(ticker) = Ticker::from_code(key[8]) {
                result.insert(ticker, decode_u64(RATES_DB_NAME, value)?);
            }
        }
        Ok(result)
    }

    pub fn get_rate(
        &self,
        height: u64,
        ticker: Ticker,
        db_transaction: &impl Transaction,
    ) -> Result<Option<u64>, LedgerError> {
        match db_transaction.get(self.rates, &rate_key(height, ticker)) {
            Ok(bytes) => Ok(Some(decode_u64(RATES_DB_NAME, bytes)?)),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Winning oracle submissions per height.
#[derive(Clone)]
pub struct GradeStore {
    grades: Database,
}

impl GradeStore {
    pub fn new(env: &Environment) -> Result<Self, LedgerError> {
        Ok(GradeStore {
            grades: env.open_db(Some(GRADES_DB_NAME))?,
        })
    }

    pub fn create(env: &Environment) -> Result<(), LedgerError> {
        env.create_db(Some(GRADES_DB_NAME), DatabaseFlags::empty())?;
        Ok(())
    }

    pub fn insert(
        &self,
        height: u64,
        winners: &[Winner],
        db_transaction: &mut RwTransaction,
    ) -> Result<(), LedgerError> {
        let bytes =
            serde_json::to_vec(winners).map_err(|e| LedgerError::Serialization(e.to_string()))?;
        db_transaction.put(self.grades, &height_key(height), &bytes, WriteFlags::empty())?;
        Ok(())
    }

    pub fn get(
        &self,
        height: u64,
        db_transaction: &impl Transaction,
    ) -> Result<Option<Vec<Winner>>, LedgerError> {
        match db_transaction.get(self.grades, &height_key(height)) {
            Ok(bytes) => serde_json::from_slice(bytes)
                .map(Some)
                .map_err(|e| LedgerError::Corrupt {
                    table: GRADES_DB_NAME,
                    reason: e.to_string(),
                }),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Trailing averages over the last `window` heights, cached for the most
/// recently requested height only.
///
/// Only non-zero samples count. A ticker with fewer than `window / 2`
/// samples averages to zero, as does every ticker below height `window`.
/// The window is expected to be even and at least 2; see
/// [`ProtocolParameters::validate`](crate::params::ProtocolParameters::validate).
#[derive(Debug, Clone)]
pub struct RateAverageCache {
    window: u64,
    cached: Option<(u64, BTreeMap<Ticker, u64>)>,
}

impl RateAverageCache {
    pub fn new(window: u64) -> Self {
        Self {
            window,
            cached: None,
        }
    }

    pub fn average_rates(
        &mut self,
        rates: &RateStore,
        height: u64,
        db_transaction: &impl Transaction,
    ) -> Result<BTreeMap<Ticker, u64>, LedgerError> {
        if let Some((cached_height, averages)) = &self.cached {
            if *cached_height == height {
                return Ok(averages.clone());
            }
        }
        let averages = Self::compute(self.window, rates, height, db_transaction)?;
        self.cached = Some((height, averages.clone()));
        Ok(averages)
    }

    /// Drop the cached map. Called when the transaction it was computed in
    /// did not commit.
    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    pub fn compute(
        window: u64,
        rates: &RateStore,
        height: u64,
        db_transaction: &impl Transaction,
    ) -> Result<BTreeMap<Ticker, u64>, LedgerError> {
        let mut averages: BTreeMap<Ticker, u64> = Ticker::ALL.iter().map(|&t| (t, 0)).collect();
        if window == 0 || height < window {
            return Ok(averages);
        }

        let mut samples: BTreeMap<Ticker, (u128, u64)> = BTreeMap::new();
        for h in (height + 1 - window)..=height {
            for (ticker, rate) in rates.get_rates(h, db_transaction)? {
                if rate > 0 {
                    let (sum, count) = samples.entry(ticker).or_insert((0, 0));
                    *sum += rate as u128;
                    *count += 1;
                }
            }
        }

        let min_samples = window / 2;
        for (ticker, (sum, count)) in samples {
            if count >= min_samples && count > 0 {
                averages.insert(ticker, (sum / count as u128) as u64);
            }
        }
        debug!(height, window, "Computed rate averages");
        Ok(averages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::ledger::test_utils::create_test_env;

    fn setup() -> (tempfile::TempDir, Environment, RateStore, GradeStore) {
        let (dir, env) = create_test_env();
        RateStore::create(&env).unwrap();
        GradeStore::create(&env).unwrap();
        let rates = RateStore::new(&env).unwrap();
        let grades = GradeStore::new(&env).unwrap();
        (dir, env, rates, grades)
    }

    fn write(env: &Environment, store: &RateStore, height: u64, rates: &[(Ticker, u64)]) {
        let mut txn = env.begin_rw_txn().unwrap();
        store
            .insert_rates(height, &rates.iter().copied().collect(), &mut txn)
            .unwrap();
        txn.commit().unwrap();
    }

    #[test]
    fn test_rates_are_write_once() {
        let (_dir, env, store, _) = setup();
        write(&env, &store, 5, &[(Ticker::PUsd, 100), (Ticker::Peg, 3)]);
        write(&env, &store, 6, &[(Ticker::PUsd, 101)]);

        let txn = env.begin_ro_txn().unwrap();
        let at5 = store.get_rates(5, &txn).unwrap();
        assert_eq!(at5.len(), 2);
        assert_eq!(store.get_rate(6, Ticker::PUsd, &txn).unwrap(), Some(101));
        assert_eq!(store.get_rate(6, Ticker::Peg, &txn).unwrap(), None);
        assert!(store.get_rates(7, &txn).unwrap().is_empty());
        drop(txn);

        let mut txn = env.begin_rw_txn().unwrap();
        let again = [(Ticker::PUsd, 1)].into_iter().collect();
        assert!(matches!(
            store.insert_rates(5, &again, &mut txn),
            Err(LedgerError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_grades_round_trip() {
        let (_dir, env, _, grades) = setup();
        let winners = vec![Winner {
            entry_hash: [4; 32],
            payout: Address([5; 32]),
        }];
        let mut txn = env.begin_rw_txn().unwrap();
        grades.insert(9, &winners, &mut txn).unwrap();
        txn.commit().unwrap();

        let txn = env.begin_ro_txn().unwrap();
        assert_eq!(grades.get(9, &txn).unwrap(), Some(winners));
        assert_eq!(grades.get(10, &txn).unwrap(), None);
    }

    #[test]
    fn test_average_of_constant_is_constant() {
        let (_dir, env, store, _) = setup();
        for h in 1..=8 {
            write(&env, &store, h, &[(Ticker::PUsd, 250)]);
        }
        let txn = env.begin_ro_txn().unwrap();
        let averages = RateAverageCache::compute(8, &store, 8, &txn).unwrap();
        assert_eq!(averages[&Ticker::PUsd], 250);
        assert_eq!(averages[&Ticker::PEur], 0);
        assert_eq!(averages.len(), Ticker::ALL.len());
    }

    #[test]
    fn test_sparse_window_averages_to_zero() {
        let (_dir, env, store, _) = setup();
        // 3 of 8 samples present: below the 4-sample minimum.
        for h in [2, 4, 6] {
            write(&env, &store, h, &[(Ticker::PUsd, 100)]);
        }
        write(&env, &store, 8, &[(Ticker::PUsd, 0)]);
        let txn = env.begin_ro_txn().unwrap();
        assert_eq!(RateAverageCache::compute(8, &store, 8, &txn).unwrap()[&Ticker::PUsd], 0);
    }

    #[test]
    fn test_half_window_is_enough() {
        let (_dir, env, store, _) = setup();
        for (h, rate) in [(5, 100), (6, 101), (7, 0), (8, 102), (9, 104)] {
            write(&env, &store, h, &[(Ticker::PUsd, rate)]);
        }
        let txn = env.begin_ro_txn().unwrap();
        // Window 9..=2 holds 100, 101, 102, 104; the zero is ignored.
        assert_eq!(RateAverageCache::compute(8, &store, 9, &txn).unwrap()[&Ticker::PUsd], 101);
    }

    #[test]
    fn test_below_window_is_zero() {
        let (_dir, env, store, _) = setup();
        for h in 1..=7 {
            write(&env, &store, h, &[(Ticker::PUsd, 250)]);
        }
        let txn = env.begin_ro_txn().unwrap();
        assert_eq!(RateAverageCache::compute(8, &store, 7, &txn).unwrap()[&Ticker::PUsd], 0);
    }

    #[test]
    fn test_cache_is_single_entry() {
        let (_dir, env, store, _) = setup();
        for h in 1..=4 {
            write(&env, &store, h, &[(Ticker::PUsd, 10)]);
        }
        let mut cache = RateAverageCache::new(4);
        {
            let txn = env.begin_ro_txn().unwrap();
            assert_eq!(cache.average_rates(&store, 4, &txn).unwrap()[&Ticker::PUsd], 10);
        }

        write(&env, &store, 5, &[(Ticker::PUsd, 50)]);
        let txn = env.begin_ro_txn().unwrap();
        // Same height: served from the cache.
        assert_eq!(cache.average_rates(&store, 4, &txn).unwrap()[&Ticker::PUsd], 10);
        // New height: recomputed over 2..=5.
        assert_eq!(cache.average_rates(&store, 5, &txn).unwrap()[&Ticker::PUsd], 20);
        cache.invalidate();
        assert_eq!(cache.average_rates(&store, 5, &txn).unwrap()[&Ticker::PUsd], 20);
    }
}
