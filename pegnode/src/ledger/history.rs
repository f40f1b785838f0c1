// Copyright (c) 2024 Botho Foundation

//! Transaction history and its lookup indexes.
//!
//! Every applied batch, coinbase payout and burn is stored as one
//! [`HistoryBatch`] keyed by a 32-byte hash (entry hash, winning oracle entry
//! or factoid transaction id). The presence of that key is also the replay
//! guard for transaction batches.

use super::{height_key, LedgerError};
use crate::address::Address;
use crate::batch::Output;
use crate::ticker::Ticker;
use crate::txid::TxId;
use lmdb::{Cursor, Database, DatabaseFlags, Environment, RwTransaction, Transaction, WriteFlags};
use serde::{Deserialize, Serialize};

/// entry hash (32) -> JSON HistoryBatch
pub const HISTORY_DB_NAME: &str = "history";
/// address (32) || height (8 BE) || entry hash (32) || index (4 BE) -> empty
pub const HISTORY_BY_ADDRESS_DB_NAME: &str = "history_by_address";
/// height (8 BE) || entry hash (32) -> empty
pub const HISTORY_BY_HEIGHT_DB_NAME: &str = "history_by_height";

/// Largest page a query returns.
pub const HISTORY_PAGE_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Transfer,
    Conversion,
    Coinbase,
    Burn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryAction {
    pub index: u32,
    pub kind: ActionKind,
    /// Spender for transfers and conversions, recipient for coinbase and burns.
    pub address: Address,
    pub asset: Ticker,
    pub amount: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_asset: Option<Ticker>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_amount: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<Output>,
}

impl HistoryAction {
    fn involves(&self, address: &Address) -> bool {
        self.address == *address || self.outputs.iter().any(|o| o.address == *address)
    }

    fn mentions(&self, asset: Ticker) -> bool {
        self.asset == asset || self.to_asset == Some(asset)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryBatch {
    #[serde(with = "hex")]
    pub entry_hash: [u8; 32],
    pub height: u64,
    pub timestamp: u64,
    pub actions: Vec<HistoryAction>,
}

/// What a history query selects on. Exactly one per query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistorySelector {
    Entry([u8; 32]),
    Address(Address),
    Height(u64),
    TxId(TxId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryFilter {
    pub selector: HistorySelector,
    pub kind: Option<ActionKind>,
    pub asset: Option<Ticker>,
    pub offset: usize,
    pub limit: usize,
}

impl HistoryFilter {
    pub fn new(selector: HistorySelector) -> Self {
        Self {
            selector,
            kind: None,
            asset: None,
            offset: 0,
            limit: HISTORY_PAGE_LIMIT,
        }
    }

    fn accepts(&self, action: &HistoryAction) -> bool {
        self.kind.map_or(true, |k| action.kind == k)
            && self.asset.map_or(true, |a| action.mentions(a))
    }
}

/// One action with the batch it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryRow {
    pub tx_id: String,
    pub height: u64,
    pub timestamp: u64,
    #[serde(flatten)]
    pub action: HistoryAction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HistoryPage {
    pub rows: Vec<HistoryRow>,
    /// Offset of the next page, if there is one.
    pub next_offset: Option<usize>,
}

#[derive(Clone)]
pub struct HistoryStore {
    batches: Database,
    by_address: Database,
    by_height: Database,
}

fn address_key(address: &Address, height: u64, hash: &[u8; 32], index: u32) -> [u8; 76] {
    let mut key = [0u8; 76];
    key[..32].copy_from_slice(address.as_bytes());
    key[32..40].copy_from_slice(&height_key(height));
    key[40..72].copy_from_slice(hash);
    key[72..].copy_from_slice(&index.to_be_bytes());
    key
}

fn height_index_key(height: u64, hash: &[u8; 32]) -> [u8; 40] {
    let mut key = [0u8; 40];
    key[..8].copy_from_slice(&height_key(height));
    key[8..].copy_from_slice(hash);
    key
}

impl HistoryStore {
    pub fn new(env: &Environment) -> Result<Self, LedgerError> {
        Ok(HistoryStore {
            batches: env.open_db(Some(HISTORY_DB_NAME))?,
            by_address: env.open_db(Some(HISTORY_BY_ADDRESS_DB_NAME))?,
            by_height: env.open_db(Some(HISTORY_BY_HEIGHT_DB_NAME))?,
        })
    }

    pub fn create(env: &Environment) -> Result<(), LedgerError> {
        env.create_db(Some(HISTORY_DB_NAME), DatabaseFlags::empty())?;
        env.create_db(Some(HISTORY_BY_ADDRESS_DB_NAME), DatabaseFlags::empty())?;
        env.create_db(Some(HISTORY_BY_HEIGHT_DB_NAME), DatabaseFlags::empty())?;
        Ok(())
    }

    /// Whether anything was recorded under `hash`.
    pub fn contains(
        &self,
        hash: &[u8; 32],
        db_transaction: &impl Transaction,
    ) -> Result<bool, LedgerError> {
        match db_transaction.get(self.batches, hash) {
            Ok(_) => Ok(true),
            Err(lmdb::Error::NotFound) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn insert(
        &self,
        batch: &HistoryBatch,
        db_transaction: &mut RwTransaction,
    ) -> Result<(), LedgerError> {
        let bytes =
            serde_json::to_vec(batch).map_err(|e| LedgerError::Serialization(e.to_string()))?;
        match db_transaction.put(
            self.batches,
            &batch.entry_hash,
            &bytes,
            WriteFlags::NO_OVERWRITE,
        ) {
            Ok(()) => {}
            Err(lmdb::Error::KeyExist) => {
                return Err(LedgerError::CorruptHistory {
                    entry: hex::encode(batch.entry_hash),
                    reason: "history already recorded".into(),
                })
            }
            Err(e) => return Err(e.into()),
        }

        db_transaction.put(
            self.by_height,
            &height_index_key(batch.height, &batch.entry_hash),
            b"",
            WriteFlags::empty(),
        )?;
        for action in &batch.actions {
            let addresses =
                std::iter::once(&action.address).chain(action.outputs.iter().map(|o| &o.address));
            for address in addresses {
                db_transaction.put(
                    self.by_address,
                    &address_key(address, batch.height, &batch.entry_hash, action.index),
                    b"",
                    WriteFlags::empty(),
                )?;
            }
        }
        Ok(())
    }

    pub fn get(
        &self,
        hash: &[u8; 32],
        db_transaction: &impl Transaction,
    ) -> Result<Option<HistoryBatch>, LedgerError> {
        match db_transaction.get(self.batches, hash) {
            Ok(bytes) => serde_json::from_slice(bytes)
                .map(Some)
                .map_err(|e| LedgerError::CorruptHistory {
                    entry: hex::encode(hash),
                    reason: e.to_string(),
                }),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn load(
        &self,
        hash: &[u8; 32],
        db_transaction: &impl Transaction,
    ) -> Result<HistoryBatch, LedgerError> {
        self.get(hash, db_transaction)?
            .ok_or_else(|| LedgerError::CorruptHistory {
                entry: hex::encode(hash),
                reason: "indexed but not stored".into(),
            })
    }

    pub fn query(
        &self,
        filter: &HistoryFilter,
        db_transaction: &impl Transaction,
    ) -> Result<HistoryPage, LedgerError> {
        let mut matches = Vec::new();
        let mut push = |batch: &HistoryBatch, action: &HistoryAction| {
            if filter.accepts(action) {
                matches.push(HistoryRow {
                    tx_id: TxId::new(action.index, batch.entry_hash).to_string(),
                    height: batch.height,
                    timestamp: batch.timestamp,
                    action: action.clone(),
                });
            }
        };

        match filter.selector {
            HistorySelector::Entry(hash) => {
                if let Some(batch) = self.get(&hash, db_transaction)? {
                    batch.actions.iter().for_each(|a| push(&batch, a));
                }
            }
            HistorySelector::TxId(id) => {
                if let Some(batch) = self.get(&id.entry_hash, db_transaction)? {
                    if let Some(action) = batch.actions.iter().find(|a| a.index == id.index) {
                        push(&batch, action);
                    }
                }
            }
            HistorySelector::Height(height) => {
                let prefix = height_key(height);
                let mut cursor = db_transaction.open_ro_cursor(self.by_height)?;
                for item in cursor.iter_from(prefix) {
                    let (key, _) = item?;
                    if key.len() != 40 || key[..8] != prefix {
                        break;
                    }
                    let mut hash = [0u8; 32];
                    hash.copy_from_slice(&key[8..]);
                    let batch = self.load(&hash, db_transaction)?;
                    batch.actions.iter().for_each(|a| push(&batch, a));
                }
            }
            HistorySelector::Address(address) => {
                let mut cursor = db_transaction.open_ro_cursor(self.by_address)?;
                let mut current: Option<HistoryBatch> = None;
                for item in cursor.iter_from(address.as_bytes()) {
                    let (key, _) = item?;
                    if key.len() != 76 || &key[..32] != address.as_bytes() {
                        break;
                    }
                    let mut hash = [0u8; 32];
                    hash.copy_from_slice(&key[40..72]);
                    let mut index = [0u8; 4];
                    index.copy_from_slice(&key[72..]);
                    let index = u32::from_be_bytes(index);

                    if current.as_ref().map(|b| b.entry_hash) != Some(hash) {
                        current = Some(self.load(&hash, db_transaction)?);
                    }
                    if let Some(batch) = &current {
                        if let Some(action) = batch
                            .actions
                            .iter()
                            .find(|a| a.index == index && a.involves(&address))
                        {
                            push(batch, action);
                        }
                    }
                }
            }
        }

        let limit = filter.limit.clamp(1, HISTORY_PAGE_LIMIT);
        let total = matches.len();
        let rows: Vec<HistoryRow> = matches.into_iter().skip(filter.offset).take(limit).collect();
        let end = filter.offset.saturating_add(rows.len());
        Ok(HistoryPage {
            next_offset: (end < total).then_some(end),
            rows,
        })
    }
}
