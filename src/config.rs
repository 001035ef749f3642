//! Global configuration parsing and validation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::bootstrap::{Arch, BootstrapConfig};
use crate::proto;
use crate::transport::ssh::SshConfig;
use crate::{AppError, Result};

/// Connection and bootstrap tunables.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ConnectConfig {
    /// Agent working directory on the target, relative to the login home.
    #[serde(default = "default_remote_dir")]
    pub remote_dir: String,
    /// Upper bound on the install lock-wait state.
    #[serde(default = "default_lock_timeout_seconds")]
    pub lock_timeout_seconds: u64,
    /// Upper bound on the bootstrap liveness ping.
    #[serde(default = "default_ping_timeout_seconds")]
    pub ping_timeout_seconds: u64,
    /// Interval between background heartbeat pings; 0 disables the
    /// heartbeat.
    #[serde(default = "default_heartbeat_interval_seconds")]
    pub heartbeat_interval_seconds: u64,
}

fn default_remote_dir() -> String {
    ".outpost".into()
}

fn default_lock_timeout_seconds() -> u64 {
    60
}

fn default_ping_timeout_seconds() -> u64 {
    60
}

fn default_heartbeat_interval_seconds() -> u64 {
    60
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            remote_dir: default_remote_dir(),
            lock_timeout_seconds: default_lock_timeout_seconds(),
            ping_timeout_seconds: default_ping_timeout_seconds(),
            heartbeat_interval_seconds: default_heartbeat_interval_seconds(),
        }
    }
}

/// SSH target settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SshSection {
    /// Host name or address.
    pub host: String,
    /// Port; defaults to 22.
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// User to authenticate as.
    pub username: String,
}

fn default_ssh_port() -> u16 {
    22
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Connection and bootstrap tunables.
    #[serde(default)]
    pub connect: ConnectConfig,
    /// SSH target; optional because the CLI's `--local` mode needs none.
    #[serde(default)]
    pub ssh: Option<SshSection>,
    /// Prebuilt agent binaries keyed by build identifier (`amd64`,
    /// `arm64`).
    #[serde(default)]
    pub binaries: HashMap<String, PathBuf>,
}

impl GlobalConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] on syntax errors, unknown architecture
    /// keys in `[binaries]`, or a zero lock timeout.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.connect.lock_timeout_seconds == 0 {
            return Err(AppError::Config(
                "connect.lock_timeout_seconds must be greater than zero".into(),
            ));
        }
        for key in self.binaries.keys() {
            if Arch::from_uname(key).is_none() {
                return Err(AppError::Config(format!(
                    "binaries: unknown architecture key '{key}'"
                )));
            }
        }
        Ok(())
    }

    /// Heartbeat interval, or `None` when disabled.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        match self.connect.heartbeat_interval_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// SSH settings in the transport's shape.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] when the `[ssh]` section is absent.
    pub fn ssh_config(&self) -> Result<SshConfig> {
        let ssh = self
            .ssh
            .as_ref()
            .ok_or_else(|| AppError::Config("missing [ssh] section".into()))?;
        Ok(SshConfig {
            host: ssh.host.clone(),
            port: ssh.port,
            username: ssh.username.clone(),
        })
    }

    /// Bootstrap settings in the state machine's shape.
    ///
    /// Architecture keys were validated at load time; unknown keys cannot
    /// reach here.
    #[must_use]
    pub fn bootstrap_config(&self) -> BootstrapConfig {
        let binaries = self
            .binaries
            .iter()
            .filter_map(|(key, path)| Arch::from_uname(key).map(|arch| (arch, path.clone())))
            .collect();

        BootstrapConfig {
            remote_dir: self.connect.remote_dir.clone(),
            expected_banner: proto::version_banner(),
            lock_timeout: Duration::from_secs(self.connect.lock_timeout_seconds),
            ping_timeout: Duration::from_secs(self.connect.ping_timeout_seconds),
            binaries,
        }
    }
}
