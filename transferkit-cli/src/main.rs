//! `transferkit`: developer CLI for device-to-device account transfer.
//!
//! ```text
//! transferkit export account.json --passphrase ... > frames.txt
//! shuf frames.txt | transferkit import --passphrase ... --local-passphrase ...
//! transferkit inspect 'PBQR1:0:3:...'
//! ```

mod account;
mod commands;
mod config;
mod store;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use eyre::Result;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "transferkit", version, about = "Move an account between devices as a sequence of codes")]
struct Cli {
    /// JSON config file. Defaults to `<config dir>/transferkit/config.json` when present.
    #[arg(long, global = true, env = "TRANSFERKIT_CONFIG")]
    config: Option<PathBuf>,

    /// Ciphertext bytes per frame.
    #[arg(long, global = true, env = "TRANSFERKIT_FRAGMENT_SIZE")]
    fragment_size: Option<usize>,

    /// scrypt cost as log2(N).
    #[arg(long, global = true, env = "TRANSFERKIT_SCRYPT_LOG_N")]
    scrypt_log_n: Option<u8>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the frames of an account, one code string per line.
    Export(commands::export::ExportArgs),
    /// Read code strings from stdin (any order) and store the account.
    Import(commands::import::ImportArgs),
    /// Parse a single code string and print its header.
    Inspect(commands::inspect::InspectArgs),
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let overrides = config::Overrides {
        fragment_size: cli.fragment_size,
        scrypt_log_n: cli.scrypt_log_n,
    };

    match cli.command {
        Command::Export(args) => {
            let config = config::load(cli.config.as_deref(), &overrides)?;
            commands::export::run(args, &config).await
        }
        Command::Import(args) => {
            let config = config::load(cli.config.as_deref(), &overrides)?;
            commands::import::run(args, &config).await
        }
        Command::Inspect(args) => commands::inspect::run(&args),
    }
}
