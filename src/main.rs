#![forbid(unsafe_code)]

//! `outpost` — control-side CLI.
//!
//! Bootstraps the agent on the target host (over SSH, or locally with
//! `--local`), issues one call, prints the result, and disconnects.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use outpost::bootstrap::Bootstrap;
use outpost::client::AgentHandle;
use outpost::ops::exec::{ExecArgs, ExecResult};
use outpost::ops::file_stat::{FileStatArgs, FileStatResult};
use outpost::proto::op;
use outpost::transport::local::LocalTransport;
use outpost::transport::ssh::SshTransport;
use outpost::transport::Transport;
use outpost::{AppError, GlobalConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "outpost", about = "Agentless remote-host management", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Target the local machine instead of SSH, rooted at this directory.
    #[arg(long)]
    local: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Liveness ping against the bootstrapped agent.
    Ping,

    /// Run a command on the target through the agent.
    Exec {
        /// Argv to run; the first element is the program.
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },

    /// Stat a path on the target through the agent.
    Stat {
        /// Path to inspect.
        path: String,
        /// Follow symlinks.
        #[arg(long)]
        follow: bool,
        /// Also compute a SHA-256 checksum.
        #[arg(long)]
        checksum: bool,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|err| AppError::Config(format!("cannot read config: {err}")))?;
            GlobalConfig::from_toml_str(&text)?
        }
        None => GlobalConfig::default(),
    };

    if let Some(workdir) = &args.local {
        let transport = LocalTransport::new(workdir.clone());
        run_against(&transport, &config, args.command).await
    } else {
        // The SSH connection must outlive the agent handle: its exec
        // channels are the handle's byte stream.
        let transport = SshTransport::connect(&config.ssh_config()?).await?;
        let outcome = run_against(&transport, &config, args.command).await;
        let _ = transport.disconnect().await;
        outcome
    }
}

async fn run_against(
    transport: &dyn Transport,
    config: &GlobalConfig,
    command: Command,
) -> Result<()> {
    let handle = bootstrap(transport, config).await?;
    let outcome = dispatch(&handle, command).await;
    handle.disconnect().await?;
    outcome
}

async fn bootstrap(transport: &dyn Transport, config: &GlobalConfig) -> Result<Arc<AgentHandle>> {
    let bootstrapped = Bootstrap::new(transport, config.bootstrap_config())
        .run()
        .await?;
    info!(
        installed = bootstrapped.installed,
        privileged = bootstrapped.privileged,
        "agent ready"
    );
    Ok(bootstrapped.handle)
}

async fn dispatch(handle: &AgentHandle, command: Command) -> Result<()> {
    match command {
        Command::Ping => {
            let result = handle.ping().await?;
            println!("pong from pid {}", result.pid);
        }
        Command::Exec { command } => {
            let result: ExecResult = handle
                .call(
                    op::EXEC,
                    &ExecArgs {
                        command,
                        ..ExecArgs::default()
                    },
                )
                .await?;
            print!("{}", String::from_utf8_lossy(&result.stdout));
            eprint!("{}", String::from_utf8_lossy(&result.stderr));
            if result.exit_code != 0 {
                return Err(AppError::Handler(format!(
                    "command exited with code {}",
                    result.exit_code
                )));
            }
        }
        Command::Stat {
            path,
            follow,
            checksum,
        } => {
            let result: FileStatResult = handle
                .call(
                    op::FILE_STAT,
                    &FileStatArgs {
                        path,
                        follow_symlinks: follow,
                        calculate_checksum: checksum,
                    },
                )
                .await?;
            let rendered = serde_json::to_string_pretty(&result)
                .map_err(|e| AppError::Cast(format!("render stat result: {e}")))?;
            println!("{rendered}");
        }
    }
    Ok(())
}

fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);

    let result = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))
}
