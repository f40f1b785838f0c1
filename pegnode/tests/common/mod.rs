// Copyright (c) 2024 Botho Foundation
//
//! Common utilities for pegnode integration tests.
//!
//! Provides an in-memory upstream chain with failure injection, a grader
//! that returns fixed rates, and helpers for funding and signing.
//!
//! # Example
//!
//! ```ignore
//! use common::{TestNode, burn, transfer_entry};
//!
//! let node = TestNode::new();
//! node.chain.add_burn(START, burn(&alice, 1_000));
//! node.chain.set_tip(START);
//! node.sync_to_tip().await;
//! ```

#![allow(dead_code)]

mod chain;
mod fixtures;
mod grader;

pub use chain::*;
pub use fixtures::*;
pub use grader::*;
