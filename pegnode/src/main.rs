// Copyright (c) 2024 Botho Foundation

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pegnode::commands::{self, history::HistoryArgs, rates::QuoteArgs};
use pegnode::config;

#[derive(Parser)]
#[command(name = "pegnode")]
#[command(about = "Chain-following ledger for pegged-asset transfers and conversions", long_about = None)]
struct Cli {
    /// Path to config file (default: ~/.pegnode/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Follow the upstream chain and apply every height
    Run,

    /// Show sync heights and total issuance
    Status,

    /// Show the balances of an address
    Balance {
        /// FA address
        address: String,
    },

    /// Look up transaction history
    History(HistoryCommand),

    /// Show graded rates at a height
    Rates {
        /// Height to show (default: last synced)
        height: Option<u64>,

        /// Quote a conversion from this asset
        #[arg(long, requires_all = ["to", "amount"])]
        from: Option<String>,

        /// Quote a conversion into this asset
        #[arg(long, requires = "from")]
        to: Option<String>,

        /// Amount to convert, in 1e-8 units
        #[arg(long, requires = "from")]
        amount: Option<u64>,
    },

    /// List the largest holders of an asset
    Rich {
        /// Asset ticker, e.g. PEG or pUSD
        ticker: String,

        /// Number of holders to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false, id = "selector")]
struct Selector {
    /// Actions involving this FA address
    #[arg(long)]
    address: Option<String>,

    /// Actions of one entry (hex hash)
    #[arg(long)]
    entry: Option<String>,

    /// Actions applied at this height
    #[arg(long)]
    height: Option<u64>,

    /// One transaction, as index-entryhash
    #[arg(long)]
    txid: Option<String>,
}

#[derive(Args)]
struct HistoryCommand {
    #[command(flatten)]
    selector: Selector,

    /// transfer, conversion, coinbase or burn
    #[arg(long)]
    kind: Option<String>,

    /// Only actions touching this asset
    #[arg(long)]
    asset: Option<String>,

    /// Skip this many matching actions
    #[arg(long, default_value_t = 0)]
    offset: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG overrides the default level
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config_path = cli
        .config
        .map(std::path::PathBuf::from)
        .unwrap_or_else(config::default_config_path);

    match cli.command {
        Commands::Init { force } => commands::init::run(&config_path, force),
        Commands::Run => commands::run::run(&config_path),
        Commands::Status => commands::status::run(&config_path),
        Commands::Balance { address } => commands::balance::run(&config_path, &address),
        Commands::History(cmd) => {
            let args = HistoryArgs {
                address: cmd.selector.address,
                entry: cmd.selector.entry,
                height: cmd.selector.height,
                txid: cmd.selector.txid,
                kind: cmd.kind,
                asset: cmd.asset,
                offset: cmd.offset,
            };
            commands::history::run(&config_path, args)
        }
        Commands::Rates {
            height,
            from,
            to,
            amount,
        } => {
            let quote = match (from, to, amount) {
                (Some(from), Some(to), Some(amount)) => Some(QuoteArgs { from, to, amount }),
                _ => None,
            };
            commands::rates::run(&config_path, height, quote)
        }
        Commands::Rich { ticker, limit } => commands::rich::run(&config_path, &ticker, limit),
    }
}
