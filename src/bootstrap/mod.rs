//! Bootstrap: install and start the remote agent.
//!
//! A strict state machine — each state is a precondition for the next, and
//! a failure aborts the whole attempt with the failing state named in the
//! error. No rollback is attempted beyond releasing the install lock.
//!
//! 1. ensure the working directory exists
//! 2. wait (bounded, with backoff) for a concurrent install's lock to clear
//! 3. probe the installed binary's version
//! 4. install if absent or mismatched: arch probe, lock, upload, unlock
//! 5. detect whether the connecting identity is privileged
//! 6. launch the agent attached to the session's stdio
//! 7. liveness-check with a synchronous ping

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::AgentHandle;
use crate::proto;
use crate::transport::{CommandOutput, Transport};
use crate::{AppError, BootstrapStage, Result};

/// File name of the agent binary inside the working directory.
pub const AGENT_BINARY_NAME: &str = "outpost-agent";
/// File name of the advisory install lock inside the working directory.
pub const LOCK_FILE_NAME: &str = "install.lock";

/// Initial lock-wait backoff; doubles per attempt up to [`MAX_BACKOFF`].
const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
/// Lock-wait backoff ceiling.
const MAX_BACKOFF: Duration = Duration::from_secs(5);

// ── Architecture mapping ──────────────────────────────────────────────────────

/// Supported target CPU architectures.
///
/// The platform probe (`uname -m`) maps into this set; anything outside it
/// is a fatal, non-retryable bootstrap error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    /// x86-64.
    Amd64,
    /// 64-bit ARM.
    Arm64,
}

impl Arch {
    /// Map a `uname -m` value to a supported architecture.
    #[must_use]
    pub fn from_uname(machine: &str) -> Option<Self> {
        match machine {
            "x86_64" | "amd64" => Some(Self::Amd64),
            "aarch64" | "arm64" => Some(Self::Arm64),
            _ => None,
        }
    }

    /// Build identifier used to select a prebuilt binary.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Amd64 => "amd64",
            Self::Arm64 => "arm64",
        }
    }
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Version probe classification ──────────────────────────────────────────────

/// Outcome of running the installed binary's `--version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionProbe {
    /// The binary is not installed.
    Absent,
    /// Installed, but its banner differs from the expected version.
    Mismatched,
    /// Installed and current; install is skipped.
    Current,
}

/// Classify a version probe's output against the expected banner.
///
/// The banner comparison is byte-for-byte on the trimmed stdout. A probe
/// that failed because the binary does not exist (shell `not found` /
/// `No such file`) classifies as absent; any other non-matching outcome is
/// a mismatch and triggers reinstall.
#[must_use]
pub fn classify_version_probe(output: &CommandOutput, expected_banner: &str) -> VersionProbe {
    if output.success() && output.stdout_trimmed() == expected_banner {
        return VersionProbe::Current;
    }
    let combined = format!("{}{}", output.stdout, output.stderr);
    if output.exit_code == 127
        || combined.contains("No such file or directory")
        || combined.contains("not found")
    {
        return VersionProbe::Absent;
    }
    VersionProbe::Mismatched
}

// ── Configuration ─────────────────────────────────────────────────────────────

/// Settings for one bootstrap attempt.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Agent working directory on the target, relative to the login home.
    pub remote_dir: String,
    /// Version banner an up-to-date installation must report.
    pub expected_banner: String,
    /// Upper bound on the lock-wait state.
    pub lock_timeout: Duration,
    /// Upper bound on the liveness ping.
    pub ping_timeout: Duration,
    /// Prebuilt agent binary per supported architecture.
    pub binaries: HashMap<Arch, PathBuf>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            remote_dir: ".outpost".to_owned(),
            expected_banner: proto::version_banner(),
            lock_timeout: Duration::from_secs(60),
            ping_timeout: Duration::from_secs(60),
            binaries: HashMap::new(),
        }
    }
}

/// Result of a successful bootstrap.
pub struct Bootstrapped {
    /// Connected, liveness-checked handle to the running agent.
    pub handle: Arc<AgentHandle>,
    /// Whether this attempt transferred a binary (false for an
    /// already-current installation — re-bootstrap is idempotent).
    pub installed: bool,
    /// Whether the connecting identity was already privileged.
    pub privileged: bool,
}

impl std::fmt::Debug for Bootstrapped {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bootstrapped")
            .field("installed", &self.installed)
            .field("privileged", &self.privileged)
            .finish_non_exhaustive()
    }
}

// ── State machine ─────────────────────────────────────────────────────────────

/// Drives the bootstrap states over a transport.
pub struct Bootstrap<'a> {
    transport: &'a dyn Transport,
    config: BootstrapConfig,
}

impl<'a> Bootstrap<'a> {
    /// Create a bootstrap machine over `transport`.
    #[must_use]
    pub fn new(transport: &'a dyn Transport, config: BootstrapConfig) -> Self {
        Self { transport, config }
    }

    /// Run every state in order and return the connected handle.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Bootstrap`] naming the state that failed.
    pub async fn run(&self) -> Result<Bootstrapped> {
        self.ensure_dir().await?;
        self.wait_for_lock().await?;

        let probe = self.probe_version().await?;
        let installed = match probe {
            VersionProbe::Current => {
                info!("installed agent is current, skipping install");
                false
            }
            VersionProbe::Absent | VersionProbe::Mismatched => {
                info!(probe = ?probe, "installing agent");
                self.install().await?;
                true
            }
        };

        let privileged = self.detect_privilege().await?;
        let handle = self.launch(privileged).await?;

        if let Err(e) = self.liveness_check(&handle).await {
            // Best effort: do not leave a half-launched agent behind.
            let _ = handle.disconnect().await;
            return Err(e);
        }

        Ok(Bootstrapped {
            handle,
            installed,
            privileged,
        })
    }

    fn agent_path(&self) -> String {
        format!("{}/{AGENT_BINARY_NAME}", self.config.remote_dir)
    }

    fn lock_path(&self) -> String {
        format!("{}/{LOCK_FILE_NAME}", self.config.remote_dir)
    }

    /// State 1: create the working directory if absent.
    async fn ensure_dir(&self) -> Result<()> {
        let out = self
            .run_stage(BootstrapStage::EnsureDir, &format!("mkdir -p {}", self.config.remote_dir))
            .await?;
        if !out.success() {
            return Err(stage_err(
                BootstrapStage::EnsureDir,
                format!("mkdir exited {}: {}", out.exit_code, out.stderr.trim()),
            ));
        }
        Ok(())
    }

    /// State 2: poll for the install lock to be absent, with exponential
    /// backoff, bounded by the configured timeout.
    ///
    /// The lock is advisory mutual exclusion against a concurrent
    /// bootstrap; the check-then-act window is accepted.
    async fn wait_for_lock(&self) -> Result<()> {
        let probe = format!("test ! -f {}; echo $?", self.lock_path());
        let deadline = Instant::now() + self.config.lock_timeout;
        let mut backoff = INITIAL_BACKOFF;

        loop {
            let out = self.run_stage(BootstrapStage::LockWait, &probe).await?;
            if out.stdout_trimmed() == "0" {
                return Ok(());
            }

            if Instant::now() + backoff >= deadline {
                return Err(stage_err(
                    BootstrapStage::LockWait,
                    format!(
                        "another installation is in progress (lock held beyond {:?})",
                        self.config.lock_timeout
                    ),
                ));
            }

            debug!(backoff = ?backoff, "install lock present, waiting");
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    /// State 3: run the installed binary's `--version` and classify.
    async fn probe_version(&self) -> Result<VersionProbe> {
        let out = self
            .run_stage(
                BootstrapStage::VersionProbe,
                &format!("{} --version", self.agent_path()),
            )
            .await?;
        let probe = classify_version_probe(&out, &self.config.expected_banner);
        debug!(probe = ?probe, banner = %out.stdout_trimmed(), "version probe");
        Ok(probe)
    }

    /// State 4: detect the architecture, take the install lock, transfer
    /// the matching prebuilt binary, release the lock.
    async fn install(&self) -> Result<()> {
        let out = self.run_stage(BootstrapStage::Install, "uname -m").await?;
        let machine = out.stdout_trimmed().to_owned();
        let arch = Arch::from_uname(&machine).ok_or_else(|| {
            stage_err(
                BootstrapStage::Install,
                format!("unsupported architecture: '{machine}'"),
            )
        })?;

        let source = self.config.binaries.get(&arch).ok_or_else(|| {
            stage_err(
                BootstrapStage::Install,
                format!("no prebuilt agent binary configured for {arch}"),
            )
        })?;
        let data = tokio::fs::read(source).await.map_err(|e| {
            stage_err(
                BootstrapStage::Install,
                format!("cannot read agent binary '{}': {e}", source.display()),
            )
        })?;

        // Create-exclusive via noclobber: fails if the lock already exists.
        let lock = self.lock_path();
        let take = self
            .run_stage(
                BootstrapStage::Install,
                &format!("sh -c 'set -C; : > {lock}'"),
            )
            .await?;
        if !take.success() {
            return Err(stage_err(
                BootstrapStage::Install,
                "another installation took the lock".to_owned(),
            ));
        }

        let uploaded = self
            .transport
            .upload(data, &self.agent_path(), 0o700)
            .await;

        // Release the lock regardless of the transfer outcome.
        if let Err(e) = self
            .transport
            .run_command(&format!("rm -f {lock}"))
            .await
        {
            warn!(error = %e, "failed to release install lock");
        }

        uploaded.map_err(|e| stage_err(BootstrapStage::Install, format!("transfer failed: {e}")))?;
        info!(arch = %arch, "agent binary installed");
        Ok(())
    }

    /// State 5: is the connecting identity already privileged?
    async fn detect_privilege(&self) -> Result<bool> {
        let out = self.run_stage(BootstrapStage::PrivilegeDetect, "id -u").await?;
        if !out.success() {
            return Err(stage_err(
                BootstrapStage::PrivilegeDetect,
                format!("id exited {}: {}", out.exit_code, out.stderr.trim()),
            ));
        }
        Ok(out.stdout_trimmed() == "0")
    }

    /// State 6: start the agent attached to the session's stdio.
    async fn launch(&self, privileged: bool) -> Result<Arc<AgentHandle>> {
        let mut cmd = String::new();
        if !privileged {
            cmd.push_str("sudo ");
        }
        cmd.push_str(&self.agent_path());

        debug!(cmd = %cmd, "launching agent");
        let session = self
            .transport
            .open_exec(&cmd)
            .await
            .map_err(|e| stage_err(BootstrapStage::Launch, e.to_string()))?;
        Ok(AgentHandle::connect(session))
    }

    /// State 7: synchronous ping through the live handle, bounded.
    async fn liveness_check(&self, handle: &AgentHandle) -> Result<()> {
        match tokio::time::timeout(self.config.ping_timeout, handle.ping()).await {
            Ok(Ok(result)) => {
                info!(remote_pid = result.pid, "agent is live");
                Ok(())
            }
            Ok(Err(e)) => Err(stage_err(BootstrapStage::LivenessCheck, e.to_string())),
            Err(_elapsed) => Err(stage_err(
                BootstrapStage::LivenessCheck,
                format!("no ping reply within {:?}", self.config.ping_timeout),
            )),
        }
    }

    /// Run a probe command, attributing transport failures to `stage`.
    async fn run_stage(&self, stage: BootstrapStage, cmd: &str) -> Result<CommandOutput> {
        self.transport
            .run_command(cmd)
            .await
            .map_err(|e| stage_err(stage, e.to_string()))
    }
}

fn stage_err(stage: BootstrapStage, msg: String) -> AppError {
    AppError::Bootstrap(stage, msg)
}
