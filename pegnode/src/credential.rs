// Copyright (c) 2024 Botho Foundation

//! Redeem conditions (RCDs): the credential that proves control of an
//! address.
//!
//! | Type   | Layout                        | Signature             |
//! |--------|-------------------------------|-----------------------|
//! | `0x01` | ed25519 public key (32 bytes) | ed25519 over message  |
//! | `0x0e` | SEC1 secp256k1 key (65 bytes) | ECDSA over keccak256  |
//!
//! Which types are accepted depends on the height a batch is applied at.

use crate::address::Address;
use crate::params::{Activation, ProtocolParameters};
use ed25519_dalek::{Signer as _, Verifier as _};
use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use sha3::{Digest, Keccak256};
use thiserror::Error;

pub const RCD_TYPE_ED25519: u8 = 0x01;
pub const RCD_TYPE_SECP256K1: u8 = 0x0e;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("Unknown credential type 0x{0:02x}")]
    UnknownType(u8),

    #[error("Credential type 0x{0:02x} not active at this height")]
    Inactive(u8),

    #[error("Malformed credential")]
    Malformed,

    #[error("Signature does not verify")]
    BadSignature,
}

/// The height a credential is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeightGate {
    /// Only types active at this height are accepted.
    At(u64),
    /// Every known type is accepted. Only for building a batch locally,
    /// never for replay.
    Unchecked,
}

#[derive(Debug, Clone)]
enum Key {
    Ed25519(ed25519_dalek::VerifyingKey),
    Secp256k1(k256::ecdsa::VerifyingKey),
}

/// A parsed redeem condition.
#[derive(Debug, Clone)]
pub struct Credential {
    rcd: Vec<u8>,
    key: Key,
}

impl Credential {
    pub fn parse(rcd: &[u8]) -> Result<Self, CredentialError> {
        let (&kind, body) = rcd.split_first().ok_or(CredentialError::Malformed)?;
        let key = match kind {
            RCD_TYPE_ED25519 => {
                let bytes: &[u8; 32] = body.try_into().map_err(|_| CredentialError::Malformed)?;
                Key::Ed25519(
                    ed25519_dalek::VerifyingKey::from_bytes(bytes)
                        .map_err(|_| CredentialError::Malformed)?,
                )
            }
            RCD_TYPE_SECP256K1 => {
                if body.len() != 65 {
                    return Err(CredentialError::Malformed);
                }
                Key::Secp256k1(
                    k256::ecdsa::VerifyingKey::from_sec1_bytes(body)
                        .map_err(|_| CredentialError::Malformed)?,
                )
            }
            other => return Err(CredentialError::UnknownType(other)),
        };
        Ok(Self { rcd: rcd.to_vec(), key })
    }

    pub fn kind(&self) -> u8 {
        self.rcd[0]
    }

    pub fn address(&self) -> Address {
        Address::from_rcd(&self.rcd)
    }

    pub fn check_gate(
        &self,
        gate: HeightGate,
        params: &ProtocolParameters,
    ) -> Result<(), CredentialError> {
        let height = match gate {
            HeightGate::Unchecked => return Ok(()),
            HeightGate::At(height) => height,
        };
        match self.key {
            Key::Ed25519(_) => Ok(()),
            Key::Secp256k1(_) if params.is_active(Activation::RcdE, height) => Ok(()),
            Key::Secp256k1(_) => Err(CredentialError::Inactive(self.kind())),
        }
    }

    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CredentialError> {
        match &self.key {
            Key::Ed25519(key) => {
                let sig = ed25519_dalek::Signature::from_slice(signature)
                    .map_err(|_| CredentialError::BadSignature)?;
                key.verify(message, &sig)
                    .map_err(|_| CredentialError::BadSignature)
            }
            Key::Secp256k1(key) => {
                let sig = k256::ecdsa::Signature::from_slice(signature)
                    .map_err(|_| CredentialError::BadSignature)?;
                key.verify_prehash(&Keccak256::digest(message), &sig)
                    .map_err(|_| CredentialError::BadSignature)
            }
        }
    }
}

/// A private key able to sign for its address.
pub enum Signer {
    Ed25519(ed25519_dalek::SigningKey),
    Secp256k1(k256::ecdsa::SigningKey),
}

impl Signer {
    pub fn ed25519(secret: &[u8; 32]) -> Self {
        Signer::Ed25519(ed25519_dalek::SigningKey::from_bytes(secret))
    }

    pub fn secp256k1(secret: &[u8; 32]) -> Result<Self, CredentialError> {
        k256::ecdsa::SigningKey::from_slice(secret)
            .map(Signer::Secp256k1)
            .map_err(|_| CredentialError::Malformed)
    }

    pub fn rcd(&self) -> Vec<u8> {
        match self {
            Signer::Ed25519(key) => {
                let mut rcd = vec![RCD_TYPE_ED25519];
                rcd.extend_from_slice(key.verifying_key().as_bytes());
                rcd
            }
            Signer::Secp256k1(key) => {
                let mut rcd = vec![RCD_TYPE_SECP256K1];
                rcd.extend_from_slice(key.verifying_key().to_encoded_point(false).as_bytes());
                rcd
            }
        }
    }

    pub fn address(&self) -> Address {
        Address::from_rcd(&self.rcd())
    }

    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CredentialError> {
        match self {
            Signer::Ed25519(key) => Ok(key.sign(message).to_bytes().to_vec()),
            Signer::Secp256k1(key) => {
                let sig: k256::ecdsa::Signature = key
                    .sign_prehash(&Keccak256::digest(message))
                    .map_err(|_| CredentialError::Malformed)?;
                Ok(sig.to_bytes().to_vec())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ed25519_sign_verify() {
        let signer = Signer::ed25519(&[3u8; 32]);
        let cred = Credential::parse(&signer.rcd()).unwrap();
        assert_eq!(cred.address(), signer.address());
        let sig = signer.sign(b"hello").unwrap();
        assert!(cred.verify(b"hello", &sig).is_ok());
        assert_eq!(cred.verify(b"hellp", &sig), Err(CredentialError::BadSignature));
    }

    #[test]
    fn test_secp256k1_sign_verify() {
        let signer = Signer::secp256k1(&[9u8; 32]).unwrap();
        let rcd = signer.rcd();
        assert_eq!(rcd.len(), 66);
        let cred = Credential::parse(&rcd).unwrap();
        let sig = signer.sign(b"hello").unwrap();
        assert!(cred.verify(b"hello", &sig).is_ok());
        assert!(cred.verify(b"other", &sig).is_err());
    }

    #[test]
    fn test_height_gate() {
        let params = ProtocolParameters::with_all_activations_at(100);
        let ed = Credential::parse(&Signer::ed25519(&[1u8; 32]).rcd()).unwrap();
        let ec = Credential::parse(&Signer::secp256k1(&[1u8; 32]).unwrap().rcd()).unwrap();

        assert!(ed.check_gate(HeightGate::At(0), &params).is_ok());
        assert_eq!(
            ec.check_gate(HeightGate::At(99), &params),
            Err(CredentialError::Inactive(RCD_TYPE_SECP256K1))
        );
        assert!(ec.check_gate(HeightGate::At(100), &params).is_ok());
        assert!(ec.check_gate(HeightGate::Unchecked, &params).is_ok());
    }

    #[test]
    fn test_rejects_malformed() {
        assert_eq!(Credential::parse(&[]).unwrap_err(), CredentialError::Malformed);
        assert_eq!(
            Credential::parse(&[0x02; 33]).unwrap_err(),
            CredentialError::UnknownType(0x02)
        );
        assert_eq!(
            Credential::parse(&[RCD_TYPE_ED25519; 10]).unwrap_err(),
            CredentialError::Malformed
        );
    }
}
