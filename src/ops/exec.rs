//! Run a command on the agent host.

use std::collections::HashMap;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::{AppError, Result};

/// `Exec` arguments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecArgs {
    /// Argv; the first element is the program.
    pub command: Vec<String>,
    /// Working directory; empty means the agent's own.
    #[serde(default)]
    pub dir: String,
    /// Extra environment variables layered over the agent's environment.
    #[serde(default)]
    pub environment: HashMap<String, String>,
    /// Bytes piped to the child's stdin.
    #[serde(default)]
    pub stdin: Vec<u8>,
    /// Expand `$VAR` / `${VAR}` references in each argv element against
    /// `environment`, falling back to the agent's environment.
    #[serde(default)]
    pub expand_argument_vars: bool,
}

/// `Exec` result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecResult {
    /// Captured stdout.
    pub stdout: Vec<u8>,
    /// Captured stderr.
    pub stderr: Vec<u8>,
    /// Child exit code; -1 when terminated by signal.
    pub exit_code: i32,
    /// Child pid.
    pub pid: u32,
}

/// Handle one `Exec` call.
///
/// # Errors
///
/// Returns [`AppError::Handler`] when no command is given or the child
/// cannot be spawned. A non-zero exit is reported through
/// [`ExecResult::exit_code`], not as an error.
pub async fn exec(mut args: ExecArgs) -> Result<ExecResult> {
    if args.command.is_empty() {
        return Err(AppError::Handler("no command specified".into()));
    }

    if args.expand_argument_vars {
        for part in &mut args.command {
            *part = expand_vars(part, &args.environment);
        }
    }

    let mut cmd = Command::new(&args.command[0]);
    cmd.args(&args.command[1..])
        .envs(&args.environment)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if !args.dir.is_empty() {
        cmd.current_dir(&args.dir);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| AppError::Handler(format!("failed to spawn '{}': {e}", args.command[0])))?;
    let pid = child.id().unwrap_or_default();

    if let Some(mut stdin) = child.stdin.take() {
        if !args.stdin.is_empty() {
            stdin
                .write_all(&args.stdin)
                .await
                .map_err(|e| AppError::Handler(format!("failed to write child stdin: {e}")))?;
        }
        drop(stdin);
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| AppError::Handler(format!("failed waiting for child: {e}")))?;

    Ok(ExecResult {
        stdout: output.stdout,
        stderr: output.stderr,
        exit_code: output.status.code().unwrap_or(-1),
        pid,
    })
}

/// Expand `$NAME` and `${NAME}` references against `overlay`, falling back
/// to the process environment. Unknown names expand to the empty string.
#[must_use]
pub fn expand_vars(input: &str, overlay: &HashMap<String, String>) -> String {
    let resolve = |name: &str| -> String {
        overlay
            .get(name)
            .cloned()
            .or_else(|| std::env::var(name).ok())
            .unwrap_or_default()
    };

    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some(&(start, '{')) => {
                let rest = &input[start + 1..];
                if let Some(end) = rest.find('}') {
                    out.push_str(&resolve(&rest[..end]));
                    let consumed = rest[..end].chars().count() + 2;
                    for _ in 0..consumed {
                        chars.next();
                    }
                } else {
                    out.push('$');
                }
            }
            Some(&(start, c2)) if c2 == '_' || c2.is_ascii_alphabetic() => {
                let rest = &input[start..];
                let len = rest
                    .find(|c: char| !(c == '_' || c.is_ascii_alphanumeric()))
                    .unwrap_or(rest.len());
                out.push_str(&resolve(&rest[..len]));
                for _ in 0..len {
                    chars.next();
                }
            }
            _ => out.push('$'),
        }
    }
    out
}
