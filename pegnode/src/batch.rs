// Copyright (c) 2024 Botho Foundation

//! Transaction batches: wire model, canonical parsing and validation.
//!
//! A batch is the JSON content of one transaction-chain entry. It is signed
//! by the key of its single input address; the entry's external IDs carry
//! `[salt, rcd_0, sig_0, …]`.
//!
//! Parsing rejects unknown keys and duplicate keys at every level, so no
//! field can be smuggled past a signature computed over the content. As a
//! last check the parsed batch is re-encoded and its length compared with the
//! content minus insignificant whitespace; keys that decode to nothing, such
//! as `"transfers":null`, fail there.

use crate::address::{Address, GLOBAL_BURN_ADDRESS};
use crate::chain::{ChainId, NewEntry};
use crate::credential::{Credential, CredentialError, HeightGate, Signer};
use crate::params::ProtocolParameters;
use crate::ticker::Ticker;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use thiserror::Error;

pub const BATCH_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error("Malformed batch: {0}")]
    Malformed(String),

    #[error("Unsupported batch version {0}")]
    Version(u8),

    #[error("Batch has no transactions")]
    Empty,

    #[error("Transaction {0} has a zero input amount")]
    ZeroAmount(usize),

    #[error("Transaction {0} spends from the burn address")]
    BurnInput(usize),

    #[error("Transaction {0}: outputs do not sum to the input amount")]
    OutputMismatch(usize),

    #[error("Transaction {0} converts into its own ticker")]
    SameTicker(usize),

    #[error("Transaction {index}: ticker {ticker} is not active")]
    InactiveTicker { index: usize, ticker: Ticker },

    #[error("Batch must have exactly one input address")]
    MultipleInputs,

    #[error("Expected {expected} signature pairs, found {found}")]
    SignatureCount { expected: usize, found: usize },

    #[error("Credential does not redeem the input address")]
    AddressMismatch,

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),
}

/// The spent side of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Input {
    pub address: Address,
    pub amount: u64,
    #[serde(rename = "type")]
    pub ticker: Ticker,
}

/// An untyped transfer output. It is paid in the input's ticker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Output {
    pub address: Address,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Transfer(Vec<Output>),
    Conversion(Ticker),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireTransaction", into = "WireTransaction")]
pub struct Transaction {
    pub input: Input,
    pub action: Action,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireTransaction {
    input: Input,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transfers: Option<Vec<Output>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    conversion: Option<Ticker>,
}

impl TryFrom<WireTransaction> for Transaction {
    type Error = String;

    fn try_from(wire: WireTransaction) -> Result<Self, Self::Error> {
        let action = match (wire.transfers, wire.conversion) {
            (Some(outputs), None) if !outputs.is_empty() => Action::Transfer(outputs),
            (None, Some(ticker)) => Action::Conversion(ticker),
            (Some(_), Some(_)) => return Err("transfers and conversion are exclusive".into()),
            _ => return Err("transaction needs transfers or a conversion".into()),
        };
        Ok(Transaction { input: wire.input, action })
    }
}

impl From<Transaction> for WireTransaction {
    fn from(tx: Transaction) -> Self {
        let (transfers, conversion) = match tx.action {
            Action::Transfer(outputs) => (Some(outputs), None),
            Action::Conversion(ticker) => (None, Some(ticker)),
        };
        WireTransaction { input: tx.input, transfers, conversion }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransactionBatch {
    pub version: u8,
    pub transactions: Vec<Transaction>,
}

impl TransactionBatch {
    pub fn parse(content: &[u8]) -> Result<Self, BatchError> {
        let batch: Self =
            serde_json::from_slice(content).map_err(|e| BatchError::Malformed(e.to_string()))?;
        let expected = batch.to_json()?.len();
        let found = compact_len(content);
        if expected != found {
            return Err(BatchError::Malformed(format!(
                "non-canonical encoding: {found} bytes, expected {expected}"
            )));
        }
        Ok(batch)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, BatchError> {
        serde_json::to_vec(self).map_err(|e| BatchError::Malformed(e.to_string()))
    }

    /// The one address every transaction spends from.
    pub fn input_address(&self) -> Result<Address, BatchError> {
        let first = self.transactions.first().ok_or(BatchError::Empty)?.input.address;
        if self.transactions.iter().any(|tx| tx.input.address != first) {
            return Err(BatchError::MultipleInputs);
        }
        Ok(first)
    }

    /// Structural checks. Tickers are gated by height unless the gate is
    /// [`HeightGate::Unchecked`].
    pub fn validate(&self, gate: HeightGate, params: &ProtocolParameters) -> Result<(), BatchError> {
        if self.version != BATCH_VERSION {
            return Err(BatchError::Version(self.version));
        }
        self.input_address()?;

        for (index, tx) in self.transactions.iter().enumerate() {
            if tx.input.amount == 0 {
                return Err(BatchError::ZeroAmount(index));
            }
            if tx.input.address == GLOBAL_BURN_ADDRESS {
                return Err(BatchError::BurnInput(index));
            }
            let check_active = |ticker: Ticker| match gate {
                HeightGate::At(height) if !params.ticker_active(ticker, height) => {
                    Err(BatchError::InactiveTicker { index, ticker })
                }
                _ => Ok(()),
            };
            check_active(tx.input.ticker)?;

            match &tx.action {
                Action::Transfer(outputs) => {
                    let total = outputs
                        .iter()
                        .try_fold(0u64, |acc, o| acc.checked_add(o.amount))
                        .ok_or(BatchError::OutputMismatch(index))?;
                    if total != tx.input.amount {
                        return Err(BatchError::OutputMismatch(index));
                    }
                }
                Action::Conversion(to) => {
                    if *to == tx.input.ticker {
                        return Err(BatchError::SameTicker(index));
                    }
                    check_active(*to)?;
                }
            }
        }
        Ok(())
    }
}

/// Length of `content` without whitespace outside of string literals.
fn compact_len(content: &[u8]) -> usize {
    let mut len = 0;
    let mut in_string = false;
    let mut escaped = false;
    for &byte in content {
        if in_string {
            len += 1;
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b' ' | b'\t' | b'\n' | b'\r' => {}
            b'"' => {
                in_string = true;
                len += 1;
            }
            _ => len += 1,
        }
    }
    len
}

/// The message signed by credential pair `index`.
pub fn signed_message(index: usize, salt: &[u8], chain: &ChainId, content: &[u8]) -> [u8; 64] {
    let mut hasher = Sha512::new();
    hasher.update(index.to_string().as_bytes());
    hasher.update(salt);
    hasher.update(chain);
    hasher.update(content);
    let mut message = [0u8; 64];
    message.copy_from_slice(&hasher.finalize());
    message
}

/// Check that the entry carries exactly one credential pair per input
/// address and that each pair signs the content.
pub fn validate_signatures(
    batch: &TransactionBatch,
    ext_ids: &[Vec<u8>],
    chain: &ChainId,
    content: &[u8],
    gate: HeightGate,
    params: &ProtocolParameters,
) -> Result<(), BatchError> {
    let input = batch.input_address()?;
    let (salt, pairs) = ext_ids.split_first().ok_or(BatchError::SignatureCount {
        expected: 1,
        found: 0,
    })?;
    if pairs.len() % 2 != 0 {
        return Err(BatchError::Malformed("unpaired credential".into()));
    }
    if pairs.len() != 2 {
        return Err(BatchError::SignatureCount { expected: 1, found: pairs.len() / 2 });
    }

    let credential = Credential::parse(&pairs[0])?;
    credential.check_gate(gate, params)?;
    if credential.address() != input {
        return Err(BatchError::AddressMismatch);
    }
    credential.verify(&signed_message(0, salt, chain, content), &pairs[1])?;
    Ok(())
}

/// Parse and fully validate a transaction-chain entry.
pub fn parse_entry(
    ext_ids: &[Vec<u8>],
    content: &[u8],
    chain: &ChainId,
    gate: HeightGate,
    params: &ProtocolParameters,
) -> Result<TransactionBatch, BatchError> {
    let batch = TransactionBatch::parse(content)?;
    batch.validate(gate, params)?;
    validate_signatures(&batch, ext_ids, chain, content, gate, params)?;
    Ok(batch)
}

/// Build a signed entry for `batch`.
pub fn sign_batch(
    batch: &TransactionBatch,
    signer: &Signer,
    salt: &[u8],
    chain: &ChainId,
) -> Result<NewEntry, BatchError> {
    let content = batch.to_json()?;
    let signature = signer.sign(&signed_message(0, salt, chain, &content))?;
    let ext_ids = vec![salt.to_vec(), signer.rcd(), signature];
    Ok(NewEntry { chain: *chain, ext_ids, content })
}
