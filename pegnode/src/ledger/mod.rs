// Copyright (c) 2024 Botho Foundation

//! LMDB-backed ledger.
//!
//! Each table is a small store struct that owns one or more named databases
//! and takes the transaction to operate in as an argument. The block applier
//! threads a single [`RwTransaction`] through every store so a height commits
//! as one unit; readers open their own read transactions and only ever see
//! committed state.

mod balances;
mod bank;
mod hardfork;
mod history;
mod rates;

pub use balances::{BalanceStore, InsufficientBalance};
pub use bank::{BankEntry, BankStore, BankUsage};
pub use hardfork::{check_hard_forks, HardForkStore, SyncVersion};
pub use history::{
    ActionKind, HistoryAction, HistoryBatch, HistoryFilter, HistoryPage, HistoryRow, HistorySelector,
    HistoryStore, HISTORY_PAGE_LIMIT,
};
pub use rates::{GradeStore, RateAverageCache, RateStore};

use lmdb::{
    Database, DatabaseFlags, Environment, EnvironmentFlags, RoTransaction, RwTransaction,
    Transaction, WriteFlags,
};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] lmdb::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt record in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },

    #[error("Corrupt history for entry {entry}: {reason}")]
    CorruptHistory { entry: String, reason: String },

    #[error("Balance overflow")]
    BalanceOverflow,

    #[error("Bank entry already exists at height {0}")]
    BankEntryExists(u64),

    #[error("No bank entry at height {0}")]
    BankEntryMissing(u64),

    #[error("Bank entry at height {0} was already filled")]
    BankEntryFilled(u64),

    #[error("Checkpoint out of order: expected height {expected}, got {got}")]
    CheckpointOrder { expected: u64, got: u64 },

    #[error(
        "Height {height} was synced with logic version {recorded} but version {required} is \
         required. Upgrade the node and resync from scratch."
    )]
    HardForkMismatch {
        height: u64,
        recorded: u32,
        required: u32,
    },
}

impl LedgerError {
    /// Errors meaning the stored state can no longer be trusted. Retrying
    /// will not help; the operator has to intervene.
    pub fn is_consistency(&self) -> bool {
        matches!(
            self,
            LedgerError::Corrupt { .. }
                | LedgerError::CorruptHistory { .. }
                | LedgerError::BankEntryExists(_)
                | LedgerError::BankEntryFilled(_)
                | LedgerError::CheckpointOrder { .. }
                | LedgerError::HardForkMismatch { .. }
        )
    }
}

pub(crate) fn height_key(height: u64) -> [u8; 8] {
    height.to_be_bytes()
}

pub(crate) fn decode_u64(table: &'static str, bytes: &[u8]) -> Result<u64, LedgerError> {
    let raw: [u8; 8] = bytes.try_into().map_err(|_| LedgerError::Corrupt {
        table,
        reason: format!("expected 8 bytes, found {}", bytes.len()),
    })?;
    Ok(u64::from_le_bytes(raw))
}

const META_DB_NAME: &str = "meta";
const META_SYNCED_HEIGHT: &[u8] = b"synced_height";
const MAP_SIZE: usize = 1024 * 1024 * 1024;

/// The node's persistent state.
pub struct Ledger {
    env: Environment,
    meta: Database,
    pub balances: BalanceStore,
    pub rates: RateStore,
    pub grades: GradeStore,
    pub bank: BankStore,
    pub hard_forks: HardForkStore,
    pub history: HistoryStore,
}

impl Ledger {
    /// Open or create a ledger in `dir`.
    pub fn open(dir: &Path) -> Result<Self, LedgerError> {
        fs::create_dir_all(dir)?;

        // NO_TLS lets query threads hold read transactions while the sync
        // task holds the write transaction.
        let env = Environment::new()
            .set_flags(EnvironmentFlags::NO_SUB_DIR | EnvironmentFlags::NO_TLS)
            .set_max_dbs(12)
            .set_map_size(MAP_SIZE)
            .open(dir.join("ledger.mdb").as_ref())?;

        let meta = env.create_db(Some(META_DB_NAME), DatabaseFlags::empty())?;
        BalanceStore::create(&env)?;
        RateStore::create(&env)?;
        GradeStore::create(&env)?;
        BankStore::create(&env)?;
        HardForkStore::create(&env)?;
        HistoryStore::create(&env)?;

        let ledger = Self {
            meta,
            balances: BalanceStore::new(&env)?,
            rates: RateStore::new(&env)?,
            grades: GradeStore::new(&env)?,
            bank: BankStore::new(&env)?,
            hard_forks: HardForkStore::new(&env)?,
            history: HistoryStore::new(&env)?,
            env,
        };

        let synced = ledger.synced_height(&ledger.read_txn()?)?;
        info!(path = %dir.display(), ?synced, "Opened ledger");
        Ok(ledger)
    }

    pub fn read_txn(&self) -> Result<RoTransaction<'_>, LedgerError> {
        Ok(self.env.begin_ro_txn()?)
    }

    pub fn write_txn(&self) -> Result<RwTransaction<'_>, LedgerError> {
        Ok(self.env.begin_rw_txn()?)
    }

    /// The highest height whose effects are committed, if any.
    pub fn synced_height(&self, txn: &impl Transaction) -> Result<Option<u64>, LedgerError> {
        match txn.get(self.meta, &META_SYNCED_HEIGHT) {
            Ok(bytes) => Ok(Some(decode_u64(META_DB_NAME, bytes)?)),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Advance the checkpoint to `height`, which must be the next height
    /// after the current checkpoint (or `first` on an empty ledger).
    pub fn advance_checkpoint(
        &self,
        txn: &mut RwTransaction,
        height: u64,
        first: u64,
    ) -> Result<(), LedgerError> {
        let expected = self.synced_height(txn)?.map_or(first, |h| h + 1);
        if height != expected {
            return Err(LedgerError::CheckpointOrder {
                expected,
                got: height,
            });
        }
        txn.put(
            self.meta,
            &META_SYNCED_HEIGHT,
            &height.to_le_bytes(),
            WriteFlags::empty(),
        )?;
        Ok(())
    }

    /// Committed checkpoint, read outside any unit of work.
    pub fn committed_height(&self) -> Result<Option<u64>, LedgerError> {
        self.synced_height(&self.read_txn()?)
    }
}
