// Copyright (c) 2024 Botho Foundation

use super::{block_timestamp, FixedGrader, MockChain};
use pegnode::address::{Address, BURN_SINK};
use pegnode::api::NodeApi;
use pegnode::applier::{AppliedBlock, ApplyError, BlockApplier};
use pegnode::batch::{sign_batch, Action, Input, Output, Transaction, TransactionBatch, BATCH_VERSION};
use pegnode::chain::{Entry, FactoidIo, FactoidTransaction};
use pegnode::credential::Signer;
use pegnode::ledger::Ledger;
use pegnode::params::{ProtocolParameters, COIN};
use pegnode::sync::{Pass, SyncDriver, SyncStatus};
use pegnode::ticker::Ticker;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// First height every test node applies.
pub const START: u64 = 100;

/// PEG at half a dollar, pUSD at one, pEUR at half. pFCT at one.
pub const DEFAULT_RATES: [(Ticker, u64); 4] = [
    (Ticker::Peg, COIN / 2),
    (Ticker::PUsd, COIN),
    (Ticker::PEur, COIN / 2),
    (Ticker::PFct, COIN),
];

/// Everything active from [`START`], averaging over the shortest valid
/// window. A height whose predecessor carries no rates, or the same rates,
/// averages to its own spot rate.
pub fn test_params() -> ProtocolParameters {
    with_average_window(2)
}

pub fn with_average_window(window: u64) -> ProtocolParameters {
    let mut params = ProtocolParameters::with_all_activations_at(START);
    params.average_window = window;
    params
}

pub struct TestNode {
    pub dir: TempDir,
    pub ledger: Arc<Ledger>,
    pub chain: Arc<MockChain>,
    pub grader: Arc<FixedGrader>,
    pub params: Arc<ProtocolParameters>,
    pub status: Arc<SyncStatus>,
}

impl TestNode {
    pub fn new() -> Self {
        Self::with_params(test_params())
    }

    pub fn with_params(params: ProtocolParameters) -> Self {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(Ledger::open(dir.path()).unwrap());
        Self {
            dir,
            ledger,
            chain: Arc::new(MockChain::new(&params)),
            grader: Arc::new(FixedGrader::new(&DEFAULT_RATES)),
            params: Arc::new(params),
            status: Arc::new(SyncStatus::new()),
        }
    }

    /// A second node following the same chain from a fresh ledger.
    pub fn fresh_follower(&self) -> Self {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(Ledger::open(dir.path()).unwrap());
        Self {
            dir,
            ledger,
            chain: self.chain.clone(),
            grader: self.grader.clone(),
            params: self.params.clone(),
            status: Arc::new(SyncStatus::new()),
        }
    }

    pub fn applier(&self) -> BlockApplier {
        BlockApplier::new(
            self.ledger.clone(),
            self.chain.clone(),
            self.grader.clone(),
            self.params.clone(),
        )
    }

    pub fn driver(&self) -> SyncDriver {
        SyncDriver::new(
            self.ledger.clone(),
            self.chain.clone(),
            self.applier(),
            self.params.clone(),
            self.status.clone(),
            Duration::from_millis(10),
        )
    }

    pub fn api(&self) -> NodeApi {
        NodeApi::new(
            self.ledger.clone(),
            self.chain.clone(),
            self.params.clone(),
            self.status.clone(),
        )
    }

    pub async fn apply(&self, height: u64) -> Result<Option<AppliedBlock>, ApplyError> {
        self.applier().apply(height, &CancellationToken::new()).await
    }

    /// One driver pass with a live token.
    pub async fn sync_to_tip(&self) -> Pass {
        self.driver()
            .pass(&CancellationToken::new())
            .await
            .unwrap()
    }

    pub fn balance(&self, address: &Address, ticker: Ticker) -> u64 {
        self.api().get_balance(address, ticker).unwrap()
    }

    pub fn balances(&self, address: &Address) -> BTreeMap<Ticker, u64> {
        self.api().get_all_balances(address).unwrap()
    }

    pub fn committed(&self) -> Option<u64> {
        self.ledger.committed_height().unwrap()
    }
}

pub fn signer(seed: u8) -> Signer {
    Signer::ed25519(&[seed; 32])
}

/// A factoid transaction burning `amount` from `address` into the sink.
pub fn burn(address: Address, amount: u64, id: u8) -> FactoidTransaction {
    FactoidTransaction {
        id: [id; 32],
        inputs: vec![FactoidIo { address, amount }],
        outputs: vec![],
        ec_outputs: vec![FactoidIo {
            address: BURN_SINK,
            amount: 0,
        }],
    }
}

pub fn transfer(from: &Signer, ticker: Ticker, to: Address, amount: u64) -> Transaction {
    Transaction {
        input: Input {
            address: from.address(),
            amount,
            ticker,
        },
        action: Action::Transfer(vec![Output { address: to, amount }]),
    }
}

pub fn conversion(from: &Signer, ticker: Ticker, amount: u64, to: Ticker) -> Transaction {
    Transaction {
        input: Input {
            address: from.address(),
            amount,
            ticker,
        },
        action: Action::Conversion(to),
    }
}

pub fn batch(transactions: Vec<Transaction>) -> TransactionBatch {
    TransactionBatch {
        version: BATCH_VERSION,
        transactions,
    }
}

/// Sign `batch` and wrap it as an entry appearing at `height`. Distinct
/// salts give distinct entry hashes for identical content.
pub fn signed_entry(
    params: &ProtocolParameters,
    signer: &Signer,
    batch: &TransactionBatch,
    salt: &[u8],
    height: u64,
) -> Entry {
    let new = sign_batch(batch, signer, salt, &params.transaction_chain).unwrap();
    Entry {
        hash: new.hash(),
        ext_ids: new.ext_ids,
        content: new.content,
        timestamp: block_timestamp(height),
    }
}

/// An oracle record that the fixed grader pays out to `payout`.
pub fn oracle_entry(payout: Address, nonce: u8) -> Entry {
    let mut content = payout.as_bytes().to_vec();
    content.push(nonce);
    Entry {
        hash: [nonce; 32],
        ext_ids: vec![vec![nonce]],
        content,
        timestamp: 0,
    }
}
