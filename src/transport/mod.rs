//! Transport seam between the control process and the target host.
//!
//! The protocol layer never talks to SSH directly; it sees only this
//! trait. Bootstrap uses [`Transport::run_command`] for its probe commands,
//! [`Transport::upload`] for the binary transfer, and
//! [`Transport::open_exec`] to start the long-running agent process whose
//! stdio becomes the RPC stream.
//!
//! Implementations:
//! - [`ssh::SshTransport`] — russh-based SSH client (the production path).
//! - [`local::LocalTransport`] — local child processes, used by the CLI's
//!   `--local` mode and by bootstrap tests.

pub mod local;
pub mod ssh;

use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::Result;

/// Boxed async reader half of an exec session.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
/// Boxed async writer half of an exec session.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Captured output of a one-shot remote command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Collected stdout, lossily decoded as UTF-8.
    pub stdout: String,
    /// Collected stderr, lossily decoded as UTF-8.
    pub stderr: String,
    /// Process exit code; -1 when the remote reported none.
    pub exit_code: i32,
}

impl CommandOutput {
    /// Whether the command exited zero.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Trimmed stdout, the usual shape for probe commands.
    #[must_use]
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// A long-running remote process attached to the session's stdio.
///
/// `stdin`/`stdout` are reserved exclusively for the RPC protocol; `stderr`,
/// when the transport can separate it, is a protocol-free diagnostic channel
/// the client mirrors into local logs.
pub struct ExecSession {
    /// Write half: control process → remote process stdin.
    pub stdin: BoxedWriter,
    /// Read half: remote process stdout → control process.
    pub stdout: BoxedReader,
    /// Remote stderr, if the transport exposes it separately.
    pub stderr: Option<BoxedReader>,
}

impl std::fmt::Debug for ExecSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecSession")
            .field("stderr", &self.stderr.is_some())
            .finish_non_exhaustive()
    }
}

/// Interface between the bootstrap/client layers and the target host.
///
/// Object-safe so a boxed transport can be shared across the bootstrap
/// machine and the CLI without generics at every call site.
pub trait Transport: Send + Sync {
    /// Run a one-shot command on the target and collect its output.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`](crate::AppError::Transport) if the
    /// command cannot be started or the session fails mid-stream. A non-zero
    /// exit code is **not** an error; callers inspect [`CommandOutput`].
    fn run_command(&self, cmd: &str) -> Pin<Box<dyn Future<Output = Result<CommandOutput>> + Send + '_>>;

    /// Write `data` to `path` on the target with the given permission bits.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`](crate::AppError::Transport) if the
    /// transfer fails or the remote write exits non-zero.
    fn upload(
        &self,
        data: Vec<u8>,
        path: &str,
        mode: u32,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Start a long-running process on the target and hand back its stdio.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`](crate::AppError::Transport) if the
    /// process cannot be started.
    fn open_exec(&self, cmd: &str) -> Pin<Box<dyn Future<Output = Result<ExecSession>> + Send + '_>>;
}
