// Copyright (c) 2024 Botho Foundation

//! Collaborator interfaces: the upstream chain client and the oracle grader.
//!
//! The node never talks to the network or grades price submissions itself.
//! It consumes a [`ChainClient`] for blocks and entries and a [`Grader`] that
//! turns a height's oracle entries into winning rates.

use crate::address::Address;
use crate::params::GraderVersion;
use crate::ticker::Ticker;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::collections::BTreeMap;
use thiserror::Error;

/// A 32-byte chain identifier.
pub type ChainId = [u8; 32];

/// Compute a chain ID from its name parts: SHA-256 over the concatenated
/// SHA-256 of each part.
pub fn chain_id(parts: &[&[u8]]) -> ChainId {
    let mut outer = Sha256::new();
    for part in parts {
        outer.update(Sha256::digest(part));
    }
    outer.finalize().into()
}

/// Hash of an entry's marshalled form: `SHA256(SHA512(data) || data)`.
pub fn entry_hash(chain: &ChainId, ext_ids: &[Vec<u8>], content: &[u8]) -> [u8; 32] {
    let ext_len: usize = ext_ids.iter().map(|e| 2 + e.len()).sum();
    let mut data = Vec::with_capacity(35 + ext_len + content.len());
    data.push(0u8);
    data.extend_from_slice(chain);
    data.extend_from_slice(&(ext_len as u16).to_be_bytes());
    for ext in ext_ids {
        data.extend_from_slice(&(ext.len() as u16).to_be_bytes());
        data.extend_from_slice(ext);
    }
    data.extend_from_slice(content);

    let mut hasher = Sha256::new();
    hasher.update(Sha512::digest(&data));
    hasher.update(&data);
    hasher.finalize().into()
}

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Block not found at height {0}")]
    MissingBlock(u64),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Submission not configured: {0}")]
    NotConfigured(&'static str),
}

/// The upstream's view of its own tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainHeights {
    /// Highest fully saved directory block.
    pub directory_block: u64,
    /// Height the network leader is working on.
    pub leader: u64,
}

/// A directory block: which chains had entries at a height.
#[derive(Debug, Clone)]
pub struct BlockHeader {
    pub height: u64,
    pub key_mr: [u8; 32],
    pub timestamp: u64,
    /// Chain ID to entry-block reference.
    pub chains: BTreeMap<ChainId, [u8; 32]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub hash: [u8; 32],
    pub ext_ids: Vec<Vec<u8>>,
    pub content: Vec<u8>,
    pub timestamp: u64,
}

/// An entry to be written to a chain.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub chain: ChainId,
    pub ext_ids: Vec<Vec<u8>>,
    pub content: Vec<u8>,
}

impl NewEntry {
    pub fn hash(&self) -> [u8; 32] {
        entry_hash(&self.chain, &self.ext_ids, &self.content)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FactoidIo {
    pub address: Address,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactoidTransaction {
    pub id: [u8; 32],
    pub inputs: Vec<FactoidIo>,
    pub outputs: Vec<FactoidIo>,
    pub ec_outputs: Vec<FactoidIo>,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn heights(&self) -> Result<ChainHeights, ChainError>;

    async fn block_header(&self, height: u64) -> Result<BlockHeader, ChainError>;

    /// Entries of one chain's entry block within the directory block `block`.
    async fn entries(&self, block: &[u8; 32], chain_ref: &[u8; 32]) -> Result<Vec<Entry>, ChainError>;

    async fn factoid_block(&self, height: u64) -> Result<Vec<FactoidTransaction>, ChainError>;

    /// Write an entry to the chain, returning its entry hash.
    async fn submit_entry(&self, entry: &NewEntry) -> Result<[u8; 32], ChainError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Winner {
    #[serde(with = "hex")]
    pub entry_hash: [u8; 32],
    pub payout: Address,
}

/// Outcome of grading one height. Empty for heights without submissions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GradeResult {
    pub rates: BTreeMap<Ticker, u64>,
    pub winners: Vec<Winner>,
}

#[derive(Debug, Error)]
#[error("Grading failed: {0}")]
pub struct GradeError(pub String);

/// Turns a height's oracle entries into winning rates. Must not touch the
/// ledger.
pub trait Grader: Send + Sync {
    fn grade(
        &self,
        version: GraderVersion,
        height: u64,
        entries: &[Entry],
    ) -> Result<GradeResult, GradeError>;
}

/// A grader that never prices anything. Conversions stay disabled; transfers
/// and burns still apply.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unpriced;

impl Grader for Unpriced {
    fn grade(&self, _: GraderVersion, _: u64, _: &[Entry]) -> Result<GradeResult, GradeError> {
        Ok(GradeResult::default())
    }
}
