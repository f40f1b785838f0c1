// Copyright (c) 2024 Botho Foundation

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::params::ProtocolParameters;

/// Main configuration for the node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Network preset. Protocol parameters follow from it and are not
    /// configurable individually.
    #[serde(default)]
    pub network: Network,

    /// Directory holding the LMDB ledger
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
}

impl Network {
    pub fn parameters(self) -> ProtocolParameters {
        match self {
            Network::Mainnet => ProtocolParameters::mainnet(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// factomd JSON-RPC endpoint
    #[serde(default = "default_factomd_url")]
    pub factomd_url: String,

    /// factom-walletd endpoint, needed only to submit batches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub walletd_url: Option<String>,

    /// Entry-credit address that pays for submitted entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ec_address: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            factomd_url: default_factomd_url(),
            walletd_url: None,
            ec_address: None,
        }
    }
}

fn default_factomd_url() -> String {
    "http://localhost:8088/v2".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Seconds to wait before polling again after catching up or failing
    #[serde(default = "default_retry_period_secs")]
    pub retry_period_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_period_secs: default_retry_period_secs(),
        }
    }
}

fn default_retry_period_secs() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: Network::default(),
            data_dir: default_data_dir(),
            upstream: UpstreamConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load `path`, or fall back to defaults if it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    pub fn retry_period(&self) -> Duration {
        Duration::from_secs(self.sync.retry_period_secs)
    }
}

pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pegnode")
}

pub fn default_config_path() -> PathBuf {
    default_data_dir().join("config.toml")
}
