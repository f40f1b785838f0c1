// Copyright (c) 2024 Botho Foundation

use anyhow::{anyhow, bail, Context, Result};
use std::path::Path;

use super::{format_amount, Node};
use crate::address::Address;
use crate::config::Config;
use crate::ledger::{ActionKind, HistoryFilter, HistorySelector};
use crate::ticker::Ticker;
use crate::txid::TxId;

/// What to look up. Exactly one of the selectors must be set.
#[derive(Debug, Default)]
pub struct HistoryArgs {
    pub address: Option<String>,
    pub entry: Option<String>,
    pub height: Option<u64>,
    pub txid: Option<String>,
    pub kind: Option<String>,
    pub asset: Option<String>,
    pub offset: usize,
}

fn parse_kind(s: &str) -> Result<ActionKind> {
    match s {
        "transfer" => Ok(ActionKind::Transfer),
        "conversion" => Ok(ActionKind::Conversion),
        "coinbase" => Ok(ActionKind::Coinbase),
        "burn" => Ok(ActionKind::Burn),
        other => bail!("Unknown action kind '{}'", other),
    }
}

fn selector(args: &HistoryArgs) -> Result<HistorySelector> {
    let mut selectors = Vec::new();
    if let Some(address) = &args.address {
        let address: Address = address.parse().context("Invalid FA address")?;
        selectors.push(HistorySelector::Address(address));
    }
    if let Some(entry) = &args.entry {
        let hash: [u8; 32] = hex::decode(entry)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| anyhow!("Entry hash must be 64 hex characters"))?;
        selectors.push(HistorySelector::Entry(hash));
    }
    if let Some(height) = args.height {
        selectors.push(HistorySelector::Height(height));
    }
    if let Some(txid) = &args.txid {
        let txid: TxId = txid.parse().context("Invalid transaction id")?;
        selectors.push(HistorySelector::TxId(txid));
    }
    match selectors.as_slice() {
        [one] => Ok(*one),
        [] => bail!("Pass one of --address, --entry, --height or --txid"),
        _ => bail!("Only one of --address, --entry, --height or --txid may be given"),
    }
}

/// Print one page of transaction history
pub fn run(config_path: &Path, args: HistoryArgs) -> Result<()> {
    let mut filter = HistoryFilter::new(selector(&args)?);
    filter.kind = args.kind.as_deref().map(parse_kind).transpose()?;
    filter.asset = args
        .asset
        .as_deref()
        .map(str::parse::<Ticker>)
        .transpose()?;
    filter.offset = args.offset;

    let config = Config::load_or_default(config_path)?;
    let node = Node::open(&config)?;
    let page = node.api().transaction_history(&filter)?;

    println!();
    if page.rows.is_empty() {
        println!("No matching history.");
    }
    for row in &page.rows {
        let action = &row.action;
        print!(
            "{:>8}  {}  {:<10} {} {} {}",
            row.height,
            row.tx_id,
            format!("{:?}", action.kind).to_lowercase(),
            action.address,
            format_amount(action.amount),
            action.asset.as_str(),
        );
        if let (Some(to_asset), Some(to_amount)) = (action.to_asset, action.to_amount) {
            print!(" -> {} {}", format_amount(to_amount), to_asset.as_str());
        }
        println!();
        for output in &action.outputs {
            println!("{:>10}-> {} {}", "", output.address, format_amount(output.amount));
        }
    }
    if let Some(next) = page.next_offset {
        println!();
        println!("More results: --offset {}", next);
    }
    println!();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exactly_one_selector() {
        assert!(selector(&HistoryArgs::default()).is_err());

        let both = HistoryArgs {
            height: Some(5),
            entry: Some("00".repeat(32)),
            ..Default::default()
        };
        assert!(selector(&both).is_err());

        let height = HistoryArgs {
            height: Some(5),
            ..Default::default()
        };
        assert_eq!(selector(&height).unwrap(), HistorySelector::Height(5));
    }

    #[test]
    fn test_bad_entry_hash() {
        let args = HistoryArgs {
            entry: Some("abcd".to_string()),
            ..Default::default()
        };
        assert!(selector(&args).is_err());
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!(parse_kind("burn").unwrap(), ActionKind::Burn);
        assert!(parse_kind("mint").is_err());
    }
}
