#![forbid(unsafe_code)]

//! `outpost-agent` — the remote agent binary.
//!
//! Serves the dispatcher loop on stdin/stdout. stdout carries nothing but
//! result envelopes; all diagnostics go to stderr, which the control
//! process mirrors into its own logs. `--version` prints the banner the
//! bootstrap version probe compares against.

use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use outpost::ops::builtin_registry;
use outpost::proto::version_banner;
use outpost::server::Dispatcher;
use outpost::{AppError, Result};

#[derive(Debug, Parser)]
#[command(
    name = "outpost-agent",
    about = "Remote agent for outpost",
    disable_version_flag = true,
    long_about = None
)]
struct Cli {
    /// Print the version banner and exit.
    #[arg(long)]
    version: bool,
}

fn main() -> Result<()> {
    let args = Cli::parse();

    if args.version {
        // The exact banner the bootstrap probe compares byte-for-byte.
        println!("{}", version_banner());
        return Ok(());
    }

    init_tracing()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(serve())
}

async fn serve() -> Result<()> {
    info!(banner = %version_banner(), pid = std::process::id(), "agent starting");

    let dispatcher = Dispatcher::new(builtin_registry());
    dispatcher
        .serve(tokio::io::stdin(), tokio::io::stdout())
        .await?;

    info!("agent stopped");
    Ok(())
}

/// Stderr-only logging: stdout belongs to the protocol.
fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))
}
