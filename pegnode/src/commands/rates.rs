// Copyright (c) 2024 Botho Foundation

use anyhow::{Context, Result};
use std::path::Path;

use super::{format_amount, Node};
use crate::config::Config;
use crate::ticker::Ticker;

/// Requested conversion quote
#[derive(Debug)]
pub struct QuoteArgs {
    pub from: String,
    pub to: String,
    pub amount: u64,
}

/// Print the graded rates at a height, optionally pricing a conversion
pub fn run(config_path: &Path, height: Option<u64>, quote: Option<QuoteArgs>) -> Result<()> {
    let config = Config::load_or_default(config_path)?;
    let node = Node::open(&config)?;
    let api = node.api();

    let height = match height {
        Some(h) => h,
        None => api
            .sync_status()?
            .local
            .context("Ledger is empty; pass a height")?,
    };

    let rates = api.rates(height)?;
    println!();
    println!("=== Rates at {} ===", height);
    if rates.is_empty() {
        println!("  (none)");
    }
    for (ticker, rate) in &rates {
        println!("  {:>6}: {} USD", ticker.as_str(), format_amount(*rate));
    }

    if let Some(q) = quote {
        let from: Ticker = q.from.parse()?;
        let to: Ticker = q.to.parse()?;
        let quote = api.quote(height, from, to, q.amount)?;
        println!();
        println!(
            "{} {} -> {} {} (spread {})",
            format_amount(quote.amount),
            from.as_str(),
            format_amount(quote.output),
            to.as_str(),
            format_amount(quote.spread),
        );
    }
    println!();

    Ok(())
}
