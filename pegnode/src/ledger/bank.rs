// Copyright (c) 2024 Botho Foundation

//! Per-height conversion cap ("bank") records.
//!
//! A height's entry is inserted once, before any conversion is evaluated,
//! and filled once, after every conversion of the height is known.

use super::{height_key, LedgerError};
use lmdb::{Database, DatabaseFlags, Environment, RwTransaction, Transaction, WriteFlags};
use serde::{Deserialize, Serialize};

/// height (8 BE) -> bincode BankEntry
pub const BANK_DB_NAME: &str = "bank";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankUsage {
    /// PEG actually minted by conversions at the height.
    pub used: u64,
    /// PEG asked for, including conversions rejected by the cap.
    pub requested: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankEntry {
    pub cap: u64,
    /// `None` until the height's conversions are summed.
    pub usage: Option<BankUsage>,
}

#[derive(Clone)]
pub struct BankStore {
    bank: Database,
}

impl BankStore {
    pub fn new(env: &Environment) -> Result<Self, LedgerError> {
        Ok(BankStore {
            bank: env.open_db(Some(BANK_DB_NAME))?,
        })
    }

    pub fn create(env: &Environment) -> Result<(), LedgerError> {
        env.create_db(Some(BANK_DB_NAME), DatabaseFlags::empty())?;
        Ok(())
    }

    pub fn get(
        &self,
        height: u64,
        db_transaction: &impl Transaction,
    ) -> Result<Option<BankEntry>, LedgerError> {
        match db_transaction.get(self.bank, &height_key(height)) {
            Ok(bytes) => bincode::deserialize(bytes)
                .map(Some)
                .map_err(|e| LedgerError::Corrupt {
                    table: BANK_DB_NAME,
                    reason: e.to_string(),
                }),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Open the height's entry with no usage recorded.
    pub fn insert(
        &self,
        height: u64,
        cap: u64,
        db_transaction: &mut RwTransaction,
    ) -> Result<(), LedgerError> {
        let entry = BankEntry { cap, usage: None };
        match db_transaction.put(
            self.bank,
            &height_key(height),
            &encode(&entry)?,
            WriteFlags::NO_OVERWRITE,
        ) {
            Ok(()) => Ok(()),
            Err(lmdb::Error::KeyExist) => Err(LedgerError::BankEntryExists(height)),
            Err(e) => Err(e.into()),
        }
    }

    /// Record the height's final usage. Allowed once per entry.
    pub fn fill(
        &self,
        height: u64,
        usage: BankUsage,
        db_transaction: &mut RwTransaction,
    ) -> Result<BankEntry, LedgerError> {
        let mut entry = self
            .get(height, db_transaction)?
            .ok_or(LedgerError::BankEntryMissing(height))?;
        if entry.usage.is_some() {
            return Err(LedgerError::BankEntryFilled(height));
        }
        entry.usage = Some(usage);
        db_transaction.put(
            self.bank,
            &height_key(height),
            &encode(&entry)?,
            WriteFlags::empty(),
        )?;
        Ok(entry)
    }
}

fn encode(entry: &BankEntry) -> Result<Vec<u8>, LedgerError> {
    bincode::serialize(entry).map_err(|e| LedgerError::Serialization(e.to_string()))
}
