// Copyright (c) 2024 Botho Foundation

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::Node;
use crate::applier::BlockApplier;
use crate::chain::Unpriced;
use crate::config::Config;
use crate::sync::{SyncDriver, SyncStatus};

/// Run the node
pub fn run(config_path: &Path) -> Result<()> {
    let config = Config::load_or_default(config_path)?;

    println!("pegnode starting. Press Ctrl+C to stop.");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async { run_async(config).await })
}

async fn run_async(config: Config) -> Result<()> {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    ctrlc::set_handler(move || {
        on_signal.cancel();
    })
    .context("Failed to install Ctrl+C handler")?;

    let node = Node::open(&config)?;
    let applier = BlockApplier::new(
        node.ledger.clone(),
        node.client.clone(),
        Arc::new(Unpriced),
        node.params.clone(),
    );
    let mut driver = SyncDriver::new(
        node.ledger.clone(),
        node.client.clone(),
        applier,
        node.params.clone(),
        Arc::new(SyncStatus::new()),
        config.retry_period(),
    );

    info!(upstream = %config.upstream.factomd_url, "Following upstream");
    driver.run(cancel).await.context("Sync stopped on a fatal error")?;

    println!("Shutdown complete.");
    Ok(())
}
