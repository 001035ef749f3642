//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Bootstrap state that failed, carried inside [`AppError::Bootstrap`].
///
/// Each variant corresponds to one state of the bootstrap machine; a
/// bootstrap error always names the state it died in so callers can report
/// "lock timeout" vs "transfer failure" vs "liveness-check failure" without
/// string matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStage {
    /// Creating the agent working directory on the remote host.
    EnsureDir,
    /// Waiting for a concurrent installation's lock file to clear.
    LockWait,
    /// Probing the installed binary's version string.
    VersionProbe,
    /// Architecture detection, binary transfer, and lock handling.
    Install,
    /// Determining whether the connecting identity is privileged.
    PrivilegeDetect,
    /// Starting the agent process on the remote host.
    Launch,
    /// The post-launch synchronous ping.
    LivenessCheck,
}

impl Display for BootstrapStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::EnsureDir => "ensure-dir",
            Self::LockWait => "lock-wait",
            Self::VersionProbe => "version-probe",
            Self::Install => "install",
            Self::PrivilegeDetect => "privilege-detect",
            Self::Launch => "launch",
            Self::LivenessCheck => "liveness-check",
        };
        write!(f, "{name}")
    }
}

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// SSH or local transport failure (connection, command, upload).
    Transport(String),
    /// Bootstrap failure, identifying the state machine stage that failed.
    Bootstrap(BootstrapStage, String),
    /// Malformed frame, missing id, or other wire protocol violation.
    Protocol(String),
    /// Line framing failure on the NDJSON stream.
    Codec(String),
    /// Structural cast between a document and a typed value failed.
    Cast(String),
    /// Error returned by a remote operation handler, verbatim.
    Handler(String),
    /// The connection was closed while a call was still outstanding.
    ConnectionClosed(String),
    /// Requested entity (operation, pending call) does not exist.
    NotFound(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Bootstrap(stage, msg) => write!(f, "bootstrap ({stage}): {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Codec(msg) => write!(f, "codec: {msg}"),
            Self::Cast(msg) => write!(f, "cast: {msg}"),
            Self::Handler(msg) => write!(f, "handler: {msg}"),
            Self::ConnectionClosed(msg) => write!(f, "connection closed: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
