// Copyright (c) 2024 Botho Foundation

//! Composite transaction identifiers: `<index>-<entry hash>`.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Largest transaction index accepted when parsing. An entry cannot hold
/// anywhere near this many transactions.
pub const MAX_TX_INDEX: u32 = 100_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxIdError {
    #[error("Missing '-' separator")]
    Separator,

    #[error("Index is not a decimal number")]
    Index,

    #[error("Index exceeds {MAX_TX_INDEX}")]
    IndexTooLarge,

    #[error("Entry hash must be 32 bytes of hex")]
    Hash,
}

/// One transaction within a batch entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxId {
    pub index: u32,
    pub entry_hash: [u8; 32],
}

impl TxId {
    pub fn new(index: u32, entry_hash: [u8; 32]) -> Self {
        Self { index, entry_hash }
    }

    /// Render with the index zero-padded to `pad` digits.
    pub fn format(&self, pad: usize) -> String {
        format!("{:0pad$}-{}", self.index, hex::encode(self.entry_hash), pad = pad)
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format(1))
    }
}

impl FromStr for TxId {
    type Err = TxIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (index, hash) = s.split_once('-').ok_or(TxIdError::Separator)?;
        if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TxIdError::Index);
        }
        let digits = index.trim_start_matches('0');
        let index = if digits.is_empty() {
            0
        } else {
            digits.parse::<u32>().map_err(|_| TxIdError::IndexTooLarge)?
        };
        if index > MAX_TX_INDEX {
            return Err(TxIdError::IndexTooLarge);
        }

        let mut entry_hash = [0u8; 32];
        hex::decode_to_slice(hash, &mut entry_hash).map_err(|_| TxIdError::Hash)?;
        Ok(Self { index, entry_hash })
    }
}
