// Copyright (c) 2024 Botho Foundation

//! CLI command implementations.
//!
//! These modules implement the user-facing CLI commands and legitimately
//! use stdout for output.

#![allow(clippy::print_stdout)]

pub mod balance;
pub mod history;
pub mod init;
pub mod rates;
pub mod rich;
pub mod run;
pub mod status;

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::api::NodeApi;
use crate::chain::ChainClient;
use crate::config::Config;
use crate::factomd::FactomdClient;
use crate::ledger::Ledger;
use crate::params::{ProtocolParameters, COIN};
use crate::sync::SyncStatus;

/// Everything a command needs to talk to the ledger and the upstream chain.
pub(crate) struct Node {
    pub ledger: Arc<Ledger>,
    pub client: Arc<dyn ChainClient>,
    pub params: Arc<ProtocolParameters>,
}

impl Node {
    pub fn open(config: &Config) -> Result<Self> {
        let ledger = Ledger::open(&config.data_dir)
            .with_context(|| format!("Failed to open ledger in {}", config.data_dir.display()))?;
        let client = FactomdClient::new(
            config.upstream.factomd_url.clone(),
            config.upstream.walletd_url.clone(),
            config.upstream.ec_address.clone(),
        )
        .context("Failed to create factomd client")?;
        Ok(Self {
            ledger: Arc::new(ledger),
            client: Arc::new(client),
            params: Arc::new(config.network.parameters()),
        })
    }

    /// Query surface for one-shot commands. No sync runs in-process, so
    /// the remote height is unknown.
    pub fn api(&self) -> NodeApi {
        NodeApi::new(
            self.ledger.clone(),
            self.client.clone(),
            self.params.clone(),
            Arc::new(SyncStatus::new()),
        )
    }
}

/// Render an amount in whole units with eight decimals.
pub(crate) fn format_amount(amount: u64) -> String {
    format!("{}.{:08}", amount / COIN, amount % COIN)
}
