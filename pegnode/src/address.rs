// Copyright (c) 2024 Botho Foundation

//! Ledger addresses and their human-readable encodings.
//!
//! An [`Address`] is the double SHA-256 of a redeem condition (RCD). The
//! human form is base58 over `prefix || hash || checksum`, where the checksum
//! is the first four bytes of the double SHA-256 of `prefix || hash`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const FACTOID_PREFIX: [u8; 2] = [0x5f, 0xb1];
const ENTRY_CREDIT_PREFIX: [u8; 2] = [0x59, 0x2a];
const ENCODED_LEN: usize = 2 + 32 + 4;

/// Address that may never appear as a batch input.
pub const GLOBAL_BURN_ADDRESS: Address = Address(hex_literal::hex!(
    "031cce24bcc43b596af105167de2c03603c20ada3314a7cfb47befcad4883e6f"
));

/// Entry-credit sink that factoid burns are sent to.
pub const BURN_SINK: Address = Address(hex_literal::hex!(
    "37399721298d77984585040ea61055377039a4c3f3e2cd48c46ff643d50fd64f"
));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("Invalid base58: {0}")]
    Base58(String),

    #[error("Invalid length: expected {ENCODED_LEN} bytes, got {0}")]
    Length(usize),

    #[error("Wrong address prefix")]
    Prefix,

    #[error("Checksum mismatch")]
    Checksum,
}

/// Which human-readable form an address is rendered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    /// `FA…` spendable addresses.
    Factoid,
    /// `EC…` entry-credit addresses.
    EntryCredit,
}

impl AddressKind {
    fn prefix(self) -> [u8; 2] {
        match self {
            AddressKind::Factoid => FACTOID_PREFIX,
            AddressKind::EntryCredit => ENTRY_CREDIT_PREFIX,
        }
    }
}

pub(crate) fn sha256d(data: &[u8]) -> [u8; 32] {
    Sha256::digest(Sha256::digest(data)).into()
}

/// A 32-byte key hash. Used only as a lookup key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 32]);

impl Address {
    /// Derive the address of a redeem condition.
    pub fn from_rcd(rcd: &[u8]) -> Self {
        Address(sha256d(rcd))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn encode(&self, kind: AddressKind) -> String {
        let mut raw = Vec::with_capacity(ENCODED_LEN);
        raw.extend_from_slice(&kind.prefix());
        raw.extend_from_slice(&self.0);
        let check = sha256d(&raw);
        raw.extend_from_slice(&check[..4]);
        bs58::encode(raw).into_string()
    }

    pub fn decode(s: &str, kind: AddressKind) -> Result<Self, AddressError> {
        let raw = bs58::decode(s)
            .into_vec()
            .map_err(|e| AddressError::Base58(e.to_string()))?;
        if raw.len() != ENCODED_LEN {
            return Err(AddressError::Length(raw.len()));
        }
        if raw[..2] != kind.prefix() {
            return Err(AddressError::Prefix);
        }
        let check = sha256d(&raw[..34]);
        if raw[34..] != check[..4] {
            return Err(AddressError::Checksum);
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&raw[2..34]);
        Ok(Address(hash))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode(AddressKind::Factoid))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::decode(s, AddressKind::Factoid)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_burn_addresses() {
        assert_eq!(
            BURN_SINK.encode(AddressKind::EntryCredit),
            "EC2BURNFCT2PEGNETooo1oooo1oooo1oooo1oooo1oooo19wthin"
        );
        assert_eq!(
            GLOBAL_BURN_ADDRESS.to_string(),
            "FA1zT4aFpEvcnPqPCigB3fvGu4Q4mTXY22iiuV69DqE1pNhdF2MC"
        );
    }

    #[test]
    fn test_encode_decode() {
        let addr = Address::from_rcd(&[0x01; 33]);
        let s = addr.to_string();
        assert!(s.starts_with("FA"));
        assert_eq!(s.parse::<Address>().unwrap(), addr);
    }

    #[test]
    fn test_rejects_wrong_prefix() {
        let ec = BURN_SINK.encode(AddressKind::EntryCredit);
        assert_eq!(ec.parse::<Address>(), Err(AddressError::Prefix));
    }

    #[test]
    fn test_rejects_bad_checksum() {
        let mut s = GLOBAL_BURN_ADDRESS.to_string();
        // Flip the last character to another base58 digit.
        let last = s.pop().unwrap();
        s.push(if last == 'C' { 'D' } else { 'C' });
        assert!(matches!(
            s.parse::<Address>(),
            Err(AddressError::Checksum) | Err(AddressError::Length(_))
        ));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            "not-an-address".parse::<Address>(),
            Err(AddressError::Base58(_))
        ));
        assert!(matches!("FA".parse::<Address>(), Err(AddressError::Length(_))));
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&GLOBAL_BURN_ADDRESS).unwrap();
        assert_eq!(json, "\"FA1zT4aFpEvcnPqPCigB3fvGu4Q4mTXY22iiuV69DqE1pNhdF2MC\"");
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, GLOBAL_BURN_ADDRESS);
    }
}
