// Copyright (c) 2024 Botho Foundation

//! Pegged-asset ledger node library.
//!
//! Follows an upstream chain block by block, grades oracle price records,
//! and applies signed transfer and conversion batches to a local LMDB ledger.

#![deny(clippy::print_stdout)]

pub mod address;
pub mod api;
pub mod applier;
pub mod batch;
pub mod chain;
pub mod config;
pub mod credential;
pub mod factomd;
pub mod ledger;
pub mod params;
pub mod sync;
pub mod ticker;
pub mod txid;

// Re-export commands module for CLI binary
pub mod commands;
