//! veDOLO Dashboard Snapshots
//!
//! Fetches veDOLO, oDOLO and DOLO on-chain state from block explorers and
//! JSON-RPC, caches what is immutable, and writes the static JSON/CSV files
//! the dashboard reads.

mod aggregate;
mod cache;
mod config;
mod constants;
mod contract_state;
mod decode;
mod defillama;
mod dolo_holders;
mod early_exits;
mod error;
mod exercises;
mod explorer;
mod fetcher;
mod holders;
mod http;
mod prices;
mod reports;
mod resolver;
mod roles;
mod rpc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::{Config, FileConfig, Overrides};

#[derive(Parser, Debug)]
#[command(name = "vedolo-snapshots")]
#[command(about = "Static snapshots of veDOLO, oDOLO and DOLO on-chain state")]
struct Args {
    /// Path to config.toml (optional; defaults apply when missing)
    #[arg(short, long, default_value = constants::CONFIG_FILENAME, global = true)]
    config: PathBuf,

    /// Directory for caches and the exercise cursor
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Directory for generated JSON/CSV files
    #[arg(short, long, global = true)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq)]
enum Command {
    /// veDOLO NFT holders with locked DOLO and vote weight
    Holders,

    /// veDOLO withdrawals and early-exit penalties
    EarlyExits,

    /// oDOLO exercises: per-address volume, lock durations, USD total
    Exercises,

    /// DOLO ERC-20 holders on Ethereum and Berachain
    DoloHolders,

    /// oDOLO token and vester state
    OdoloContract,

    /// DOLO market data from CoinGecko
    Price,

    /// Dolomite protocol TVL from DefiLlama
    Defillama,

    /// Run every job in sequence
    All,
}

impl Command {
    /// Jobs whose failure does not fail `all`
    fn is_extra(self) -> bool {
        matches!(self, Self::OdoloContract | Self::Price | Self::Defillama)
    }

    fn name(self) -> &'static str {
        match self {
            Self::Holders => "holders",
            Self::EarlyExits => "early-exits",
            Self::Exercises => "exercises",
            Self::DoloHolders => "dolo-holders",
            Self::OdoloContract => "odolo-contract",
            Self::Price => "price",
            Self::Defillama => "defillama",
            Self::All => "all",
        }
    }
}

/// Order of jobs under `all`
const ALL_JOBS: [Command; 7] = [
    Command::Holders,
    Command::EarlyExits,
    Command::Exercises,
    Command::DoloHolders,
    Command::OdoloContract,
    Command::Price,
    Command::Defillama,
];

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let file_config = FileConfig::load(&args.config)?;
    let overrides = Overrides {
        data_dir: args.data_dir,
        output_dir: args.output_dir,
    };
    let config = Config::from_file(&file_config, overrides).context("Invalid configuration")?;

    match args.command {
        Command::All => run_all(&config).await,
        job => run_job(job, &config).await,
    }
}

async fn run_job(job: Command, config: &Config) -> Result<()> {
    let now = Utc::now();
    info!(job = job.name(), "starting");
    match job {
        Command::Holders => holders::run(config, now).await,
        Command::EarlyExits => early_exits::run(config, now).await,
        Command::Exercises => exercises::run(config, now).await,
        Command::DoloHolders => dolo_holders::run(config, now).await,
        Command::OdoloContract => contract_state::run(config, now).await,
        Command::Price => prices::run(config, now).await,
        Command::Defillama => defillama::run(config, now).await,
        Command::All => Err(anyhow::anyhow!("'all' runs the other jobs and is not one itself")),
    }
    .with_context(|| format!("Job '{}' failed", job.name()))
}

async fn run_all(config: &Config) -> Result<()> {
    for job in ALL_JOBS {
        match run_job(job, config).await {
            Ok(()) => {}
            Err(e) if job.is_extra() => {
                error!(job = job.name(), error = %format!("{e:#}"), "job failed, continuing");
            }
            Err(e) => return Err(e),
        }
    }
    info!("all jobs complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_global_options() {
        let args = Args::try_parse_from([
            "vedolo-snapshots",
            "exercises",
            "--data-dir",
            "/tmp/data",
            "--config",
            "alt.toml",
        ])
        .unwrap();
        assert_eq!(args.command, Command::Exercises);
        assert_eq!(args.data_dir, Some(PathBuf::from("/tmp/data")));
        assert_eq!(args.config, PathBuf::from("alt.toml"));
        assert_eq!(args.output_dir, None);
    }

    #[test]
    fn test_subcommand_names() {
        let args = Args::try_parse_from(["vedolo-snapshots", "odolo-contract"]).unwrap();
        assert_eq!(args.command, Command::OdoloContract);
        assert_eq!(args.config, PathBuf::from(constants::CONFIG_FILENAME));
        assert!(Args::try_parse_from(["vedolo-snapshots"]).is_err());
    }

    #[test]
    fn test_only_extras_are_tolerated() {
        let extras: Vec<&str> = ALL_JOBS
            .iter()
            .filter(|j| j.is_extra())
            .map(|j| j.name())
            .collect();
        assert_eq!(extras, vec!["odolo-contract", "price", "defillama"]);
        assert!(!ALL_JOBS.contains(&Command::All));
    }
}
