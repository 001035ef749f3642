//! Local transport: commands and the agent run as child processes on this
//! machine.
//!
//! Exists for the CLI's `--local` mode and for exercising the bootstrap
//! machine against a sandbox directory without a remote host. Commands run
//! through `sh -c` so the same probe strings work against both transports.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use tokio::process::Command;

use crate::transport::{CommandOutput, ExecSession, Transport};
use crate::{AppError, Result};

/// Transport that targets the local machine.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    /// Working directory for every command and the launched agent.
    workdir: PathBuf,
}

impl LocalTransport {
    /// Create a local transport rooted at `workdir`.
    #[must_use]
    pub fn new(workdir: PathBuf) -> Self {
        Self { workdir }
    }
}

impl Transport for LocalTransport {
    fn run_command(&self, cmd: &str) -> Pin<Box<dyn Future<Output = Result<CommandOutput>> + Send + '_>> {
        let cmd = cmd.to_owned();
        Box::pin(async move {
            let output = Command::new("sh")
                .arg("-c")
                .arg(&cmd)
                .current_dir(&self.workdir)
                .output()
                .await
                .map_err(|e| AppError::Transport(format!("run '{cmd}': {e}")))?;

            Ok(CommandOutput {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code: output.status.code().unwrap_or(-1),
            })
        })
    }

    fn upload(
        &self,
        data: Vec<u8>,
        path: &str,
        mode: u32,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let path = self.workdir.join(path);
        Box::pin(async move {
            tokio::fs::write(&path, &data)
                .await
                .map_err(|e| AppError::Transport(format!("write '{}': {e}", path.display())))?;

            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
                .await
                .map_err(|e| AppError::Transport(format!("chmod '{}': {e}", path.display())))?;
            Ok(())
        })
    }

    fn open_exec(&self, cmd: &str) -> Pin<Box<dyn Future<Output = Result<ExecSession>> + Send + '_>> {
        let cmd = cmd.to_owned();
        Box::pin(async move {
            let mut child = Command::new("sh")
                .arg("-c")
                .arg(&cmd)
                .current_dir(&self.workdir)
                .stdin(std::process::Stdio::piped())
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| AppError::Transport(format!("spawn '{cmd}': {e}")))?;

            let stdin = child
                .stdin
                .take()
                .ok_or_else(|| AppError::Transport("failed to capture child stdin".into()))?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| AppError::Transport("failed to capture child stdout".into()))?;
            let stderr = child
                .stderr
                .take()
                .ok_or_else(|| AppError::Transport("failed to capture child stderr".into()))?;

            // kill_on_drop would reap the child as soon as `child` left
            // scope; park the handle in a task that waits for natural exit.
            tokio::spawn(async move {
                let _ = child.wait().await;
            });

            Ok(ExecSession {
                stdin: Box::new(stdin),
                stdout: Box::new(stdout),
                stderr: Some(Box::new(stderr)),
            })
        })
    }
}
