// Copyright (c) 2024 Botho Foundation

use anyhow::{Context, Result};
use std::path::Path;

use super::{format_amount, Node};
use crate::address::Address;
use crate::config::Config;

/// Show every non-zero balance of an address
pub fn run(config_path: &Path, address: &str) -> Result<()> {
    let address: Address = address.parse().context("Invalid FA address")?;
    let config = Config::load_or_default(config_path)?;
    let node = Node::open(&config)?;
    let api = node.api();

    let balances = api.get_all_balances(&address)?;
    let state = api.sync_status()?;

    println!();
    println!("=== Balances of {} ===", address);
    if balances.is_empty() {
        println!("  (none)");
    }
    for (ticker, amount) in &balances {
        println!("  {:>6}: {}", ticker.as_str(), format_amount(*amount));
    }
    println!();
    match state.local {
        Some(h) => println!("As of height {}", h),
        None => println!("Ledger is empty"),
    }
    println!();

    Ok(())
}
