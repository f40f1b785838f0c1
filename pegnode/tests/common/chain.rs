// Copyright (c) 2024 Botho Foundation

use async_trait::async_trait;
use parking_lot::Mutex;
use pegnode::chain::{
    BlockHeader, ChainClient, ChainError, ChainHeights, ChainId, Entry, FactoidTransaction,
    NewEntry,
};
use pegnode::params::ProtocolParameters;
use std::collections::{BTreeMap, HashSet};

/// Which upstream call a failure is injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    Heights,
    Header,
    Entries,
    Factoid,
    Submit,
}

const ORACLE_REF: u8 = 1;
const TRANSACTION_REF: u8 = 2;

#[derive(Debug, Default, Clone)]
struct MockBlock {
    oracle: Option<Vec<Entry>>,
    transactions: Vec<Entry>,
    factoid: Vec<FactoidTransaction>,
}

#[derive(Debug, Default)]
struct MockState {
    tip: Option<u64>,
    blocks: BTreeMap<u64, MockBlock>,
    /// One-shot failures keyed by call and height (0 for height-less calls).
    failures: HashSet<(Call, u64)>,
    submitted: Vec<NewEntry>,
}

/// An upstream chain held in memory.
pub struct MockChain {
    oracle_chain: ChainId,
    transaction_chain: ChainId,
    state: Mutex<MockState>,
}

fn chain_ref(height: u64, kind: u8) -> [u8; 32] {
    let mut r = [0u8; 32];
    r[..8].copy_from_slice(&height.to_be_bytes());
    r[8] = kind;
    r
}

pub fn block_timestamp(height: u64) -> u64 {
    1_600_000_000 + height * 600
}

impl MockChain {
    pub fn new(params: &ProtocolParameters) -> Self {
        Self {
            oracle_chain: params.oracle_chain,
            transaction_chain: params.transaction_chain,
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn set_tip(&self, height: u64) {
        self.state.lock().tip = Some(height);
    }

    /// Give `height` an oracle entry block, possibly empty.
    pub fn add_oracle(&self, height: u64, entries: Vec<Entry>) {
        let mut state = self.state.lock();
        let block = state.blocks.entry(height).or_default();
        block.oracle.get_or_insert_with(Vec::new).extend(entries);
    }

    pub fn add_entry(&self, height: u64, entry: Entry) {
        let mut state = self.state.lock();
        state.blocks.entry(height).or_default().transactions.push(entry);
    }

    pub fn add_factoid(&self, height: u64, tx: FactoidTransaction) {
        let mut state = self.state.lock();
        state.blocks.entry(height).or_default().factoid.push(tx);
    }

    /// Make the next `call` for `height` fail once.
    pub fn fail_once(&self, call: Call, height: u64) {
        self.state.lock().failures.insert((call, height));
    }

    pub fn submitted(&self) -> Vec<NewEntry> {
        self.state.lock().submitted.clone()
    }

    fn check(&self, call: Call, height: u64) -> Result<(), ChainError> {
        if self.state.lock().failures.remove(&(call, height)) {
            return Err(ChainError::Transport(format!("injected {call:?} failure at {height}")));
        }
        Ok(())
    }

    fn within_tip(&self, height: u64) -> Result<(), ChainError> {
        match self.state.lock().tip {
            Some(tip) if height <= tip => Ok(()),
            _ => Err(ChainError::MissingBlock(height)),
        }
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn heights(&self) -> Result<ChainHeights, ChainError> {
        self.check(Call::Heights, 0)?;
        let tip = self
            .state
            .lock()
            .tip
            .ok_or_else(|| ChainError::Transport("no blocks yet".into()))?;
        Ok(ChainHeights {
            directory_block: tip,
            leader: tip + 1,
        })
    }

    async fn block_header(&self, height: u64) -> Result<BlockHeader, ChainError> {
        self.check(Call::Header, height)?;
        self.within_tip(height)?;

        let state = self.state.lock();
        let mut chains = BTreeMap::new();
        if let Some(block) = state.blocks.get(&height) {
            if block.oracle.is_some() {
                chains.insert(self.oracle_chain, chain_ref(height, ORACLE_REF));
            }
            if !block.transactions.is_empty() {
                chains.insert(self.transaction_chain, chain_ref(height, TRANSACTION_REF));
            }
        }
        Ok(BlockHeader {
            height,
            key_mr: chain_ref(height, 0),
            timestamp: block_timestamp(height),
            chains,
        })
    }

    async fn entries(&self, _block: &[u8; 32], chain_ref: &[u8; 32]) -> Result<Vec<Entry>, ChainError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&chain_ref[..8]);
        let height = u64::from_be_bytes(raw);
        self.check(Call::Entries, height)?;

        let state = self.state.lock();
        let block = state
            .blocks
            .get(&height)
            .ok_or_else(|| ChainError::Malformed("unknown entry block".into()))?;
        match chain_ref[8] {
            ORACLE_REF => Ok(block.oracle.clone().unwrap_or_default()),
            TRANSACTION_REF => Ok(block.transactions.clone()),
            _ => Err(ChainError::Malformed("unknown entry block".into())),
        }
    }

    async fn factoid_block(&self, height: u64) -> Result<Vec<FactoidTransaction>, ChainError> {
        self.check(Call::Factoid, height)?;
        self.within_tip(height)?;
        Ok(self
            .state
            .lock()
            .blocks
            .get(&height)
            .map(|b| b.factoid.clone())
            .unwrap_or_default())
    }

    async fn submit_entry(&self, entry: &NewEntry) -> Result<[u8; 32], ChainError> {
        self.check(Call::Submit, 0)?;
        self.state.lock().submitted.push(entry.clone());
        Ok(entry.hash())
    }
}
