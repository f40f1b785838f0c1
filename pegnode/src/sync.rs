// Copyright (c) 2024 Botho Foundation

//! The polling loop that keeps the ledger caught up with the upstream chain.
//!
//! The driver is the only caller of [`BlockApplier::apply`], so heights are
//! applied one at a time and strictly in order. A failed height is logged and
//! the driver returns to polling after the retry period; the height is tried
//! again from scratch on the next pass.

use crate::applier::{ApplyError, BlockApplier};
use crate::chain::ChainClient;
use crate::ledger::{check_hard_forks, Ledger, LedgerError};
use crate::params::{ParamsError, ProtocolParameters};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Fatal error applying block: {0}")]
    Apply(#[from] ApplyError),

    #[error("Invalid protocol parameters: {0}")]
    Params(#[from] ParamsError),
}

/// Heights shared with query handlers.
#[derive(Debug, Default)]
pub struct SyncStatus {
    remote: RwLock<Option<u64>>,
}

impl SyncStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last height the upstream reported, if it has been reached yet.
    pub fn remote(&self) -> Option<u64> {
        *self.remote.read()
    }

    fn set_remote(&self, height: u64) {
        *self.remote.write() = Some(height);
    }
}

/// Outcome of one poll-and-apply pass.
#[derive(Debug)]
pub enum Pass {
    /// Applied everything up to the remote height (possibly nothing).
    CaughtUp { height: Option<u64> },
    /// The upstream could not be reached.
    Unreachable,
    /// A height failed and will be retried.
    Failed(ApplyError),
    Cancelled,
}

pub struct SyncDriver {
    ledger: Arc<Ledger>,
    client: Arc<dyn ChainClient>,
    applier: BlockApplier,
    params: Arc<ProtocolParameters>,
    status: Arc<SyncStatus>,
    retry_period: Duration,
}

impl SyncDriver {
    pub fn new(
        ledger: Arc<Ledger>,
        client: Arc<dyn ChainClient>,
        applier: BlockApplier,
        params: Arc<ProtocolParameters>,
        status: Arc<SyncStatus>,
        retry_period: Duration,
    ) -> Self {
        Self {
            ledger,
            client,
            applier,
            params,
            status,
            retry_period,
        }
    }

    /// Refuse to start from a ledger synced across a fork by older logic.
    pub fn check_hard_forks(&self) -> Result<(), LedgerError> {
        let txn = self.ledger.read_txn()?;
        check_hard_forks(&self.ledger.hard_forks, &self.params.hard_forks, &txn)
    }

    fn next_height(&self) -> Result<u64, LedgerError> {
        Ok(self
            .ledger
            .committed_height()?
            .map_or(self.params.start_height, |h| h + 1))
    }

    /// Run until cancelled or a fatal error occurs.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), SyncError> {
        self.params.validate()?;
        self.check_hard_forks()?;
        info!(next = self.next_height()?, "Starting sync");

        loop {
            match self.pass(&cancel).await? {
                Pass::Cancelled => break,
                Pass::CaughtUp { height } => {
                    debug!(?height, "Caught up");
                }
                Pass::Unreachable => {}
                Pass::Failed(e) => {
                    warn!(height = e.height(), error = %e, "Height failed, will retry");
                }
            }
            if !self.pause(&cancel).await {
                break;
            }
        }
        info!("Sync stopped");
        Ok(())
    }

    /// Poll the upstream once and apply every height up to its tip.
    pub async fn pass(&mut self, cancel: &CancellationToken) -> Result<Pass, SyncError> {
        if cancel.is_cancelled() {
            return Ok(Pass::Cancelled);
        }
        let heights = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Pass::Cancelled),
            heights = self.client.heights() => heights,
        };
        let remote = match heights {
            Ok(heights) => heights.directory_block,
            Err(e) => {
                warn!(error = %e, "Upstream unreachable");
                return Ok(Pass::Unreachable);
            }
        };
        self.status.set_remote(remote);

        let mut next = self.next_height()?;
        while next <= remote {
            if cancel.is_cancelled() {
                return Ok(Pass::Cancelled);
            }
            match self.applier.apply(next, cancel).await {
                Ok(Some(_)) => next += 1,
                Ok(None) => return Ok(Pass::Cancelled),
                Err(e) if e.is_fatal() => {
                    error!(height = e.height(), error = %e, "Ledger can no longer be trusted");
                    return Err(e.into());
                }
                Err(e) => return Ok(Pass::Failed(e)),
            }
        }
        Ok(Pass::CaughtUp {
            height: next.checked_sub(1).filter(|h| *h >= self.params.start_height),
        })
    }

    /// Sleep for the retry period. Returns false if cancelled first.
    async fn pause(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.retry_period) => true,
        }
    }
}
