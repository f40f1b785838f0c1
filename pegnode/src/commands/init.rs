// Copyright (c) 2024 Botho Foundation

use anyhow::{bail, Result};
use std::path::Path;

use crate::config::Config;

/// Write a default config file
pub fn run(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        bail!(
            "Config already exists at {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    let config = Config::default();
    config.save(config_path)?;

    println!("Wrote {}", config_path.display());
    println!("  Ledger:  {}", config.data_dir.display());
    println!("  factomd: {}", config.upstream.factomd_url);
    println!();
    println!("Set upstream.walletd_url and upstream.ec_address to submit batches.");
    Ok(())
}
