// Copyright (c) 2024 Botho Foundation

//! Per-address, per-ticker balances.
//!
//! Reads through an open [`RwTransaction`] see that transaction's own writes
//! (the pending balance). Reads through a fresh read transaction see only
//! committed state (the finalized balance).

use super::{decode_u64, LedgerError};
use crate::address::Address;
use crate::ticker::Ticker;
use lmdb::{Cursor, Database, DatabaseFlags, Environment, RwTransaction, Transaction, WriteFlags};
use std::collections::BTreeMap;
use thiserror::Error;

/// address (32) || ticker code (1) -> u64 LE
pub const BALANCES_DB_NAME: &str = "balances";

/// A debit larger than the balance. Expected during validation, so it is
/// returned as a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Insufficient {ticker} balance for {address}: have {balance}, need {requested}")]
pub struct InsufficientBalance {
    pub address: Address,
    pub ticker: Ticker,
    pub balance: u64,
    pub requested: u64,
}

fn balance_key(address: &Address, ticker: Ticker) -> [u8; 33] {
    let mut key = [0u8; 33];
    key[..32].copy_from_slice(address.as_bytes());
    key[32] = ticker.code();
    key
}

#[derive(Clone)]
pub struct BalanceStore {
    balances: Database,
}

impl BalanceStore {
    pub fn new(env: &Environment) -> Result<Self, LedgerError> {
        Ok(BalanceStore {
            balances: env.open_db(Some(BALANCES_DB_NAME))?,
        })
    }

    pub fn create(env: &Environment) -> Result<(), LedgerError> {
        env.create_db(Some(BALANCES_DB_NAME), DatabaseFlags::empty())?;
        Ok(())
    }

    pub fn get(
        &self,
        address: &Address,
        ticker: Ticker,
        db_transaction: &impl Transaction,
    ) -> Result<u64, LedgerError> {
        match db_transaction.get(self.balances, &balance_key(address, ticker)) {
            Ok(bytes) => decode_u64(BALANCES_DB_NAME, bytes),
            Err(lmdb::Error::NotFound) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Every non-empty balance of `address`.
    pub fn get_all(
        &self,
        address: &Address,
        db_transaction: &impl Transaction,
    ) -> Result<BTreeMap<Ticker, u64>, LedgerError> {
        let mut result = BTreeMap::new();
        let mut cursor = db_transaction.open_ro_cursor(self.balances)?;
        for item in cursor.iter_from(balance_key(address, Ticker::Peg)) {
            let (key, value) = item?;
            if key.len() != 33 || &key[..32] != address.as_bytes() {
                break;
            }
            let amount = decode_u64(BALANCES_DB_NAME, value)?;
            if let (Some(ticker), true) = (Ticker::from_code(key[32]), amount > 0) {
                result.insert(ticker, amount);
            }
        }
        Ok(result)
    }

    /// All non-zero holders of `ticker`, unordered.
    pub fn holders(
        &self,
        ticker: Ticker,
        db_transaction: &impl Transaction,
    ) -> Result<Vec<(Address, u64)>, LedgerError> {
        let mut holders = Vec::new();
        let mut cursor = db_transaction.open_ro_cursor(self.balances)?;
        for item in cursor.iter_start() {
            let (key, value) = item?;
            if key.len() != 33 || key[32] != ticker.code() {
                continue;
            }
            let amount = decode_u64(BALANCES_DB_NAME, value)?;
            if amount > 0 {
                let mut address = [0u8; 32];
                address.copy_from_slice(&key[..32]);
                holders.push((Address(address), amount));
            }
        }
        Ok(holders)
    }

    /// Sum of every balance, per ticker.
    pub fn totals(
        &self,
        db_transaction: &impl Transaction,
    ) -> Result<BTreeMap<Ticker, u128>, LedgerError> {
        let mut totals = BTreeMap::new();
        let mut cursor = db_transaction.open_ro_cursor(self.balances)?;
        for item in cursor.iter_start() {
            let (key, value) = item?;
            let Some(ticker) = key.get(32).copied().and_then(Ticker::from_code) else {
                continue;
            };
            *totals.entry(ticker).or_insert(0u128) += decode_u64(BALANCES_DB_NAME, value)? as u128;
        }
        Ok(totals)
    }

    /// Add `amount`, creating the row if needed. Returns the pending balance.
    pub fn credit(
        &self,
        address: &Address,
        ticker: Ticker,
        amount: u64,
        db_transaction: &mut RwTransaction,
    ) -> Result<u64, LedgerError> {
        let current = self.get(address, ticker, db_transaction)?;
        let updated = current
            .checked_add(amount)
            .ok_or(LedgerError::BalanceOverflow)?;
        self.put(address, ticker, updated, db_transaction)?;
        Ok(updated)
    }

    /// Subtract `amount` if the pending balance covers it. Returns the new
    /// pending balance, or the shortfall as a domain error with no write.
    pub fn debit(
        &self,
        address: &Address,
        ticker: Ticker,
        amount: u64,
        db_transaction: &mut RwTransaction,
    ) -> Result<Result<u64, InsufficientBalance>, LedgerError> {
        let current = self.get(address, ticker, db_transaction)?;
        let Some(updated) = current.checked_sub(amount) else {
            return Ok(Err(InsufficientBalance {
                address: *address,
                ticker,
                balance: current,
                requested: amount,
            }));
        };
        self.put(address, ticker, updated, db_transaction)?;
        Ok(Ok(updated))
    }

    fn put(
        &self,
        address: &Address,
        ticker: Ticker,
        amount: u64,
        db_transaction: &mut RwTransaction,
    ) -> Result<(), LedgerError> {
        db_transaction.put(
            self.balances,
            &balance_key(address, ticker),
            &amount.to_le_bytes(),
            WriteFlags::empty(),
        )?;
        Ok(())
    }
}
