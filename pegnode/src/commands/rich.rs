// Copyright (c) 2024 Botho Foundation

use anyhow::Result;
use std::path::Path;

use super::{format_amount, Node};
use crate::config::Config;
use crate::ticker::Ticker;

/// List the largest holders of an asset
pub fn run(config_path: &Path, ticker: &str, limit: usize) -> Result<()> {
    let ticker: Ticker = ticker.parse()?;
    let config = Config::load_or_default(config_path)?;
    let node = Node::open(&config)?;

    let holders = node.api().rich_list(ticker, limit)?;

    println!();
    println!("=== Top {} holders ===", ticker.as_str());
    for (rank, (address, amount)) in holders.iter().enumerate() {
        println!("{:>4}. {} {}", rank + 1, address, format_amount(*amount));
    }
    if holders.is_empty() {
        println!("  (none)");
    }
    println!();

    Ok(())
}
