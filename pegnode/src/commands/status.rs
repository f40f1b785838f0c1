// Copyright (c) 2024 Botho Foundation

use anyhow::Result;
use std::path::Path;

use super::{format_amount, Node};
use crate::config::Config;

/// Show local and upstream sync heights plus total issuance
pub fn run(config_path: &Path) -> Result<()> {
    let config = Config::load_or_default(config_path)?;
    let node = Node::open(&config)?;
    let api = node.api();

    let state = api.sync_status()?;
    let totals = api.issuance()?;

    let rt = tokio::runtime::Runtime::new()?;
    let remote = rt.block_on(node.client.heights());

    println!();
    println!("=== pegnode Status ===");
    println!();
    println!("Sync:");
    match state.local {
        Some(height) => println!("  Local height: {}", height),
        None => println!(
            "  Local height: (nothing synced, starts at {})",
            node.params.start_height
        ),
    }
    match remote {
        Ok(heights) => println!("  Upstream height: {}", heights.directory_block),
        Err(e) => println!("  Upstream: unreachable ({})", e),
    }
    println!();
    println!("Issuance:");
    if totals.is_empty() {
        println!("  (none)");
    }
    for (ticker, total) in totals {
        // Totals can exceed u64 in principle; fall back to raw units.
        let shown = u64::try_from(total)
            .map(format_amount)
            .unwrap_or_else(|_| total.to_string());
        println!("  {:>6}: {}", ticker.as_str(), shown);
    }
    println!();

    Ok(())
}
