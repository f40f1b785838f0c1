// Copyright (c) 2024 Botho Foundation

//! Applies one upstream height to the ledger.
//!
//! A height moves through typed stages:
//!
//! ```text
//! fetch ──▶ FetchedBlock ──grade──▶ GradedBlock ──commit──▶ AppliedBlock
//! ```
//!
//! Fetching and grading never touch the ledger. Commit runs inside a single
//! LMDB write transaction: rates, grades, coinbase, burns, the bank entry,
//! every accepted batch, history, the checkpoint and the sync-version record
//! are written together or not at all. Each batch runs in a nested
//! transaction so a batch that fails domain validation rolls back alone.

use crate::address::{Address, BURN_SINK};
use crate::batch::{self, Action, BatchError, TransactionBatch};
use crate::chain::{
    BlockHeader, ChainClient, ChainError, Entry, FactoidTransaction, GradeError, GradeResult,
    Grader,
};
use crate::credential::HeightGate;
use crate::ledger::{
    ActionKind, BankEntry, BankUsage, HistoryAction, HistoryBatch, InsufficientBalance, Ledger,
    LedgerError, RateAverageCache, SyncVersion,
};
use crate::params::{Activation, ProtocolParameters, LOGIC_VERSION};
use crate::ticker::Ticker;
use lmdb::{RwTransaction, Transaction};
use peg_conversion::{convert, ConversionError, RatePolicy};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("Fetching height {height}: {source}")]
    Chain {
        height: u64,
        #[source]
        source: ChainError,
    },

    #[error("Grading height {height}: {source}")]
    Grade {
        height: u64,
        #[source]
        source: GradeError,
    },

    #[error("Committing height {height}: {source}")]
    Ledger {
        height: u64,
        #[source]
        source: LedgerError,
    },
}

impl ApplyError {
    /// Whether retrying the height can never succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ApplyError::Ledger { source, .. } if source.is_consistency())
    }

    pub fn height(&self) -> u64 {
        match self {
            ApplyError::Chain { height, .. }
            | ApplyError::Grade { height, .. }
            | ApplyError::Ledger { height, .. } => *height,
        }
    }
}

/// Why a batch was left out of its height. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("already applied")]
    Replay,

    #[error("{0}")]
    Invalid(#[from] BatchError),

    #[error("no rates at this height")]
    NoRates,

    #[error("no rate for {0}")]
    MissingRate(Ticker),

    #[error("{0}")]
    Insufficient(#[from] InsufficientBalance),

    #[error("conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    #[error("conversion of {requested} PEG exceeds remaining bank capacity {remaining}")]
    BankCapExceeded { requested: u64, remaining: u64 },

    #[error("credit would overflow a balance")]
    Overflow,
}

/// A qualifying factoid burn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Burn {
    pub tx_id: [u8; 32],
    pub address: Address,
    pub amount: u64,
}

/// A burn has one input, no factoid outputs, and one zero-valued
/// entry-credit output to the burn sink.
pub fn detect_burn(tx: &FactoidTransaction) -> Option<Burn> {
    match (tx.inputs.as_slice(), tx.outputs.is_empty(), tx.ec_outputs.as_slice()) {
        ([input], true, [sink]) if sink.address == BURN_SINK && sink.amount == 0 => Some(Burn {
            tx_id: tx.id,
            address: input.address,
            amount: input.amount,
        }),
        _ => None,
    }
}

/// Everything fetched for a height. Nothing has been written.
#[derive(Debug, Clone)]
pub struct FetchedBlock {
    pub header: BlockHeader,
    /// `None` if the height has no oracle entry block.
    pub oracle_entries: Option<Vec<Entry>>,
    pub transaction_entries: Vec<Entry>,
    pub factoid_transactions: Vec<FactoidTransaction>,
}

/// A fetched block with its grade and burns worked out.
#[derive(Debug, Clone)]
pub struct GradedBlock {
    pub header: BlockHeader,
    pub grade: GradeResult,
    pub burns: Vec<Burn>,
    pub transaction_entries: Vec<Entry>,
}

impl GradedBlock {
    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn total_burned(&self) -> u64 {
        self.burns
            .iter()
            .fold(0u64, |acc, b| acc.saturating_add(b.amount))
    }
}

/// Summary of a committed height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedBlock {
    pub height: u64,
    pub rates: usize,
    pub winners: usize,
    pub burned: u64,
    pub applied: usize,
    /// Entry hash and reason for every batch left out of the height.
    pub skipped: Vec<([u8; 32], SkipReason)>,
    pub bank: Option<BankEntry>,
}

#[derive(Debug, Default, Clone, Copy)]
struct BankTally {
    used: u64,
    requested: u64,
}

/// Applies heights strictly in order. Owns every ledger write.
pub struct BlockApplier {
    ledger: Arc<Ledger>,
    client: Arc<dyn ChainClient>,
    grader: Arc<dyn Grader>,
    params: Arc<ProtocolParameters>,
    averages: RateAverageCache,
}

async fn race<T>(
    cancel: &CancellationToken,
    fetch: impl Future<Output = Result<T, ChainError>>,
) -> Option<Result<T, ChainError>> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = fetch => Some(result),
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

impl BlockApplier {
    pub fn new(
        ledger: Arc<Ledger>,
        client: Arc<dyn ChainClient>,
        grader: Arc<dyn Grader>,
        params: Arc<ProtocolParameters>,
    ) -> Self {
        let averages = RateAverageCache::new(params.average_window);
        Self {
            ledger,
            client,
            grader,
            params,
            averages,
        }
    }

    /// Fetch, grade and commit `height`. Returns `Ok(None)` if cancelled
    /// before anything was written.
    pub async fn apply(
        &mut self,
        height: u64,
        cancel: &CancellationToken,
    ) -> Result<Option<AppliedBlock>, ApplyError> {
        let Some(fetched) = self.fetch(height, cancel).await? else {
            return Ok(None);
        };
        let graded = self.grade(fetched)?;
        if cancel.is_cancelled() {
            return Ok(None);
        }
        self.commit(&graded)
            .map(Some)
            .map_err(|source| ApplyError::Ledger { height, source })
    }

    pub async fn fetch(
        &self,
        height: u64,
        cancel: &CancellationToken,
    ) -> Result<Option<FetchedBlock>, ApplyError> {
        let chain_err = |source| ApplyError::Chain { height, source };

        let Some(header) = race(cancel, self.client.block_header(height)).await else {
            return Ok(None);
        };
        let header = header.map_err(chain_err)?;

        let oracle_entries = match header.chains.get(&self.params.oracle_chain) {
            Some(chain_ref) => {
                match race(cancel, self.client.entries(&header.key_mr, chain_ref)).await {
                    Some(entries) => Some(entries.map_err(chain_err)?),
                    None => return Ok(None),
                }
            }
            None => None,
        };

        let mut transaction_entries = Vec::new();
        let mut factoid_transactions = Vec::new();
        if self.params.is_active(Activation::Transactions, height) {
            if let Some(chain_ref) = header.chains.get(&self.params.transaction_chain) {
                match race(cancel, self.client.entries(&header.key_mr, chain_ref)).await {
                    Some(entries) => transaction_entries = entries.map_err(chain_err)?,
                    None => return Ok(None),
                }
            }
            match race(cancel, self.client.factoid_block(height)).await {
                Some(txs) => factoid_transactions = txs.map_err(chain_err)?,
                None => return Ok(None),
            }
        }

        debug!(
            height,
            oracle = oracle_entries.as_ref().map_or(0, Vec::len),
            transactions = transaction_entries.len(),
            factoid = factoid_transactions.len(),
            "Fetched block"
        );
        Ok(Some(FetchedBlock {
            header,
            oracle_entries,
            transaction_entries,
            factoid_transactions,
        }))
    }

    /// Grade the oracle entries and pick out burns. Pure with respect to the
    /// ledger.
    pub fn grade(&self, block: FetchedBlock) -> Result<GradedBlock, ApplyError> {
        let height = block.header.height;
        let mut grade = match &block.oracle_entries {
            Some(entries) => self
                .grader
                .grade(self.params.grader_version(height), height, entries)
                .map_err(|source| ApplyError::Grade { height, source })?,
            None => {
                debug!(height, "No oracle block");
                GradeResult::default()
            }
        };
        grade
            .rates
            .retain(|ticker, _| self.params.ticker_active(*ticker, height));

        let burns = block
            .factoid_transactions
            .iter()
            .filter_map(detect_burn)
            .collect();

        Ok(GradedBlock {
            header: block.header,
            grade,
            burns,
            transaction_entries: block.transaction_entries,
        })
    }

    /// Write the whole height in one transaction.
    pub fn commit(&mut self, block: &GradedBlock) -> Result<AppliedBlock, LedgerError> {
        let ledger = Arc::clone(&self.ledger);
        let mut txn = ledger.write_txn()?;
        let result = self
            .commit_in(&ledger, block, &mut txn)
            .and_then(|applied| txn.commit().map(|_| applied).map_err(LedgerError::from));

        match &result {
            Ok(applied) => info!(
                height = applied.height,
                rates = applied.rates,
                applied = applied.applied,
                skipped = applied.skipped.len(),
                burned = applied.burned,
                "Applied block"
            ),
            Err(e) => {
                // Averages may have been computed from rates that were never
                // committed.
                self.averages.invalidate();
                warn!(height = block.height(), error = %e, "Rolled back block");
            }
        }
        result
    }

    fn commit_in(
        &mut self,
        ledger: &Ledger,
        block: &GradedBlock,
        txn: &mut RwTransaction,
    ) -> Result<AppliedBlock, LedgerError> {
        let height = block.height();
        let timestamp = block.header.timestamp;
        let params = Arc::clone(&self.params);

        ledger.advance_checkpoint(txn, height, params.start_height)?;

        let rates = &block.grade.rates;
        if !rates.is_empty() || !block.grade.winners.is_empty() {
            ledger.rates.insert_rates(height, rates, txn)?;
            ledger.grades.insert(height, &block.grade.winners, txn)?;
        }

        for winner in &block.grade.winners {
            if ledger.history.contains(&winner.entry_hash, txn)? {
                continue;
            }
            ledger
                .balances
                .credit(&winner.payout, Ticker::Peg, params.coinbase_reward, txn)?;
            ledger.history.insert(
                &HistoryBatch {
                    entry_hash: winner.entry_hash,
                    height,
                    timestamp,
                    actions: vec![credit_action(
                        ActionKind::Coinbase,
                        winner.payout,
                        Ticker::Peg,
                        params.coinbase_reward,
                    )],
                },
                txn,
            )?;
        }

        for burn in &block.burns {
            if ledger.history.contains(&burn.tx_id, txn)? {
                continue;
            }
            ledger
                .balances
                .credit(&burn.address, Ticker::PFct, burn.amount, txn)?;
            ledger.history.insert(
                &HistoryBatch {
                    entry_hash: burn.tx_id,
                    height,
                    timestamp,
                    actions: vec![credit_action(
                        ActionKind::Burn,
                        burn.address,
                        Ticker::PFct,
                        burn.amount,
                    )],
                },
                txn,
            )?;
        }

        let bank_cap = params.bank_cap_at(height);
        if let Some(cap) = bank_cap {
            ledger.bank.insert(height, cap, txn)?;
        }

        let policy = params.rate_policy(height);
        let averages = match policy {
            RatePolicy::Averaged => self.averages.average_rates(&ledger.rates, height, txn)?,
            RatePolicy::Spot => BTreeMap::new(),
        };
        let pricing = Pricing {
            policy,
            rates,
            averages: &averages,
            bank_cap,
        };

        let mut tally = BankTally::default();
        let (mut applied, mut skipped) = (0, Vec::new());
        for entry in &block.transaction_entries {
            match self.execute_entry(ledger, &params, height, entry, &pricing, &mut tally, txn)? {
                Ok(()) => applied += 1,
                Err(reason) => {
                    debug!(height, entry = %hex::encode(entry.hash), %reason, "Skipped batch");
                    skipped.push((entry.hash, reason));
                }
            }
        }

        let bank = match bank_cap {
            Some(_) => Some(ledger.bank.fill(
                height,
                BankUsage {
                    used: tally.used,
                    requested: tally.requested,
                },
                txn,
            )?),
            None => None,
        };

        ledger.hard_forks.record(
            height,
            SyncVersion {
                version: LOGIC_VERSION,
                timestamp: unix_now(),
            },
            txn,
        )?;

        Ok(AppliedBlock {
            height,
            rates: rates.len(),
            winners: block.grade.winners.len(),
            burned: block.total_burned(),
            applied,
            skipped,
            bank,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn execute_entry(
        &self,
        ledger: &Ledger,
        params: &ProtocolParameters,
        height: u64,
        entry: &Entry,
        pricing: &Pricing,
        tally: &mut BankTally,
        txn: &mut RwTransaction,
    ) -> Result<Result<(), SkipReason>, LedgerError> {
        if ledger.history.contains(&entry.hash, txn)? {
            return Ok(Err(SkipReason::Replay));
        }
        let batch = match batch::parse_entry(
            &entry.ext_ids,
            &entry.content,
            &params.transaction_chain,
            HeightGate::At(height),
            params,
        ) {
            Ok(batch) => batch,
            Err(e) => return Ok(Err(e.into())),
        };
        let converts = batch
            .transactions
            .iter()
            .any(|tx| matches!(tx.action, Action::Conversion(_)));
        if converts && pricing.rates.is_empty() {
            return Ok(Err(SkipReason::NoRates));
        }

        let mut nested = txn.begin_nested_txn()?;
        let mut batch_tally = *tally;
        match execute_batch(ledger, &batch, pricing, &mut batch_tally, &mut nested)? {
            Ok(actions) => {
                ledger.history.insert(
                    &HistoryBatch {
                        entry_hash: entry.hash,
                        height,
                        timestamp: entry.timestamp,
                        actions,
                    },
                    &mut nested,
                )?;
                nested.commit()?;
                *tally = batch_tally;
                Ok(Ok(()))
            }
            Err(reason) => {
                nested.abort();
                // A rejected batch still counts toward requested capacity.
                tally.requested = batch_tally.requested;
                Ok(Err(reason))
            }
        }
    }
}

struct Pricing<'a> {
    policy: RatePolicy,
    rates: &'a BTreeMap<Ticker, u64>,
    averages: &'a BTreeMap<Ticker, u64>,
    bank_cap: Option<u64>,
}

impl Pricing<'_> {
    fn rate(&self, ticker: Ticker) -> Result<u64, SkipReason> {
        match self.rates.get(&ticker) {
            Some(&rate) if rate > 0 => Ok(rate),
            _ => Err(SkipReason::MissingRate(ticker)),
        }
    }

    fn average(&self, ticker: Ticker) -> u64 {
        self.averages.get(&ticker).copied().unwrap_or(0)
    }
}

fn credit_action(kind: ActionKind, address: Address, asset: Ticker, amount: u64) -> HistoryAction {
    HistoryAction {
        index: 0,
        kind,
        address,
        asset,
        amount,
        to_asset: None,
        to_amount: None,
        outputs: Vec::new(),
    }
}

fn credit_or_skip(
    ledger: &Ledger,
    address: &Address,
    ticker: Ticker,
    amount: u64,
    txn: &mut RwTransaction,
) -> Result<Result<(), SkipReason>, LedgerError> {
    match ledger.balances.credit(address, ticker, amount, txn) {
        Ok(_) => Ok(Ok(())),
        Err(LedgerError::BalanceOverflow) => Ok(Err(SkipReason::Overflow)),
        Err(e) => Err(e),
    }
}

/// Run every transaction of a batch against `txn`. The caller rolls `txn`
/// back on a skip.
fn execute_batch(
    ledger: &Ledger,
    batch: &TransactionBatch,
    pricing: &Pricing,
    tally: &mut BankTally,
    txn: &mut RwTransaction,
) -> Result<Result<Vec<HistoryAction>, SkipReason>, LedgerError> {
    let mut actions = Vec::with_capacity(batch.transactions.len());

    for (index, tx) in batch.transactions.iter().enumerate() {
        let input = tx.input;
        if let Err(short) = ledger
            .balances
            .debit(&input.address, input.ticker, input.amount, txn)?
        {
            return Ok(Err(short.into()));
        }

        let mut action = HistoryAction {
            index: index as u32,
            kind: ActionKind::Transfer,
            address: input.address,
            asset: input.ticker,
            amount: input.amount,
            to_asset: None,
            to_amount: None,
            outputs: Vec::new(),
        };

        match &tx.action {
            Action::Transfer(outputs) => {
                for output in outputs {
                    if let Err(reason) =
                        credit_or_skip(ledger, &output.address, input.ticker, output.amount, txn)?
                    {
                        return Ok(Err(reason));
                    }
                }
                action.outputs = outputs.clone();
            }
            Action::Conversion(to) => {
                let converted = pricing
                    .rate(input.ticker)
                    .and_then(|from_rate| Ok((from_rate, pricing.rate(*to)?)))
                    .and_then(|(from_rate, to_rate)| {
                        convert(
                            pricing.policy,
                            input.amount,
                            from_rate,
                            pricing.average(input.ticker),
                            to_rate,
                            pricing.average(*to),
                        )
                        .map_err(SkipReason::from)
                    });
                let amount = match converted {
                    Ok(amount) => amount,
                    Err(reason) => return Ok(Err(reason)),
                };

                if let (Ticker::Peg, Some(cap)) = (*to, pricing.bank_cap) {
                    tally.requested = tally.requested.saturating_add(amount);
                    let remaining = cap.saturating_sub(tally.used);
                    if amount > remaining {
                        return Ok(Err(SkipReason::BankCapExceeded {
                            requested: amount,
                            remaining,
                        }));
                    }
                    tally.used += amount;
                }

                if let Err(reason) = credit_or_skip(ledger, &input.address, *to, amount, txn)? {
                    return Ok(Err(reason));
                }
                action.kind = ActionKind::Conversion;
                action.to_asset = Some(*to);
                action.to_amount = Some(amount);
            }
        }
        actions.push(action);
    }
    Ok(Ok(actions))
}
