// Copyright (c) 2024 Botho Foundation

//! Which logic version synced each height, and the startup guard that
//! refuses to continue from a ledger built by outdated logic.

use super::{height_key, LedgerError};
use crate::params::HardFork;
use lmdb::{Cursor, Database, DatabaseFlags, Environment, RwTransaction, Transaction, WriteFlags};
use lmdb_sys::MDB_LAST;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// height (8 BE) -> bincode SyncVersion
pub const SYNC_VERSIONS_DB_NAME: &str = "sync_versions";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncVersion {
    pub version: u32,
    /// Unix seconds when the height was applied.
    pub timestamp: u64,
}

#[derive(Clone)]
pub struct HardForkStore {
    versions: Database,
}

impl HardForkStore {
    pub fn new(env: &Environment) -> Result<Self, LedgerError> {
        Ok(HardForkStore {
            versions: env.open_db(Some(SYNC_VERSIONS_DB_NAME))?,
        })
    }

    pub fn create(env: &Environment) -> Result<(), LedgerError> {
        env.create_db(Some(SYNC_VERSIONS_DB_NAME), DatabaseFlags::empty())?;
        Ok(())
    }

    pub fn record(
        &self,
        height: u64,
        version: SyncVersion,
        db_transaction: &mut RwTransaction,
    ) -> Result<(), LedgerError> {
        let bytes =
            bincode::serialize(&version).map_err(|e| LedgerError::Serialization(e.to_string()))?;
        db_transaction.put(self.versions, &height_key(height), &bytes, WriteFlags::empty())?;
        Ok(())
    }

    pub fn get(
        &self,
        height: u64,
        db_transaction: &impl Transaction,
    ) -> Result<Option<SyncVersion>, LedgerError> {
        match db_transaction.get(self.versions, &height_key(height)) {
            Ok(bytes) => decode(bytes).map(Some),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The highest height ever recorded. Keys are big-endian, so this is
    /// the last key.
    pub fn highest(&self, db_transaction: &impl Transaction) -> Result<Option<u64>, LedgerError> {
        let cursor = db_transaction.open_ro_cursor(self.versions)?;
        let key = match cursor.get(None, None, MDB_LAST) {
            Ok((key, _)) => key.unwrap_or_default(),
            Err(lmdb::Error::NotFound) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let raw: [u8; 8] = key.try_into().map_err(|_| LedgerError::Corrupt {
            table: SYNC_VERSIONS_DB_NAME,
            reason: format!("bad key length {}", key.len()),
        })?;
        Ok(Some(u64::from_be_bytes(raw)))
    }
}

fn decode(bytes: &[u8]) -> Result<SyncVersion, LedgerError> {
    bincode::deserialize(bytes).map_err(|e| LedgerError::Corrupt {
        table: SYNC_VERSIONS_DB_NAME,
        reason: e.to_string(),
    })
}

/// Fail if any fork boundary at or below the highest synced height was
/// crossed by logic older than the fork requires.
///
/// Forks whose exact height was never synced (it lies before the node's
/// first height) are skipped.
pub fn check_hard_forks(
    store: &HardForkStore,
    forks: &[HardFork],
    db_transaction: &impl Transaction,
) -> Result<(), LedgerError> {
    let Some(highest) = store.highest(db_transaction)? else {
        return Ok(());
    };
    for fork in forks.iter().filter(|f| f.height <= highest) {
        match store.get(fork.height, db_transaction)? {
            Some(recorded) if recorded.version < fork.min_version => {
                error!(
                    height = fork.height,
                    recorded = recorded.version,
                    required = fork.min_version,
                    "Ledger was synced across a hard fork with outdated logic"
                );
                return Err(LedgerError::HardForkMismatch {
                    height: fork.height,
                    recorded: recorded.version,
                    required: fork.min_version,
                });
            }
            Some(_) => {}
            None => debug!(height = fork.height, "Fork height never synced, skipping"),
        }
    }
    Ok(())
}
