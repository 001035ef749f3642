//! The agent handle: typed calls over the exec session's stdio.
//!
//! One handle per connection. The handle owns the write half behind an
//! async mutex (only one encode may be in flight on the wire), the
//! correlation registry, and the single background decode loop that routes
//! result envelopes back to waiting callers.
//!
//! `Connect` and `Disconnect` are one-shot: once the decode loop exits the
//! handle never reads the stream again, and every still-pending caller is
//! handed a synthetic connection-closed error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cast;
use crate::client::registry::InFlightRegistry;
use crate::ops::ping::{PingArgs, PingResult};
use crate::proto::codec::FrameCodec;
use crate::proto::{op, recover_id, CallEnvelope, ResultEnvelope};
use crate::transport::{BoxedReader, BoxedWriter, ExecSession};
use crate::{AppError, Result};

/// Client-side handle to a running remote agent.
pub struct AgentHandle {
    /// Identifies this connection in logs on both sides.
    instance_id: String,
    /// Serialized outbound encoder; single-writer discipline on the wire.
    writer: Mutex<FramedWrite<BoxedWriter, FrameCodec>>,
    /// Pending calls awaiting their result envelope.
    in_flight: Arc<InFlightRegistry>,
    /// Set by [`AgentHandle::disconnect`] before the transport is torn down,
    /// so the decode loop can tell expected end-of-stream from a crash.
    shutting_down: Arc<AtomicBool>,
    /// Fired by disconnect to stop the decode loop without waiting for the
    /// remote side to close its stream.
    cancel: CancellationToken,
    /// Decode loop join handle, consumed by disconnect.
    decode_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("instance_id", &self.instance_id)
            .finish_non_exhaustive()
    }
}

impl AgentHandle {
    /// Take ownership of an exec session's streams and start the decode
    /// loop (and, when the transport exposes stderr, the diagnostics
    /// mirror).
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn connect(session: ExecSession) -> Arc<Self> {
        let instance_id = uuid::Uuid::new_v4().to_string();
        let in_flight = Arc::new(InFlightRegistry::new());
        let shutting_down = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        if let Some(stderr) = session.stderr {
            tokio::spawn(mirror_stderr(stderr, instance_id.clone()));
        }

        let decode_task = tokio::spawn(run_decode_loop(
            FramedRead::new(session.stdout, FrameCodec::new()),
            Arc::clone(&in_flight),
            Arc::clone(&shutting_down),
            cancel.clone(),
            instance_id.clone(),
        ));

        info!(instance_id, "agent handle connected");

        Arc::new(Self {
            instance_id,
            writer: Mutex::new(FramedWrite::new(session.stdin, FrameCodec::new())),
            in_flight,
            shutting_down,
            cancel,
            decode_task: Mutex::new(Some(decode_task)),
        })
    }

    /// Connection identifier used in logs.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Whether a disconnect has been requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Send one call envelope and wait for its raw result envelope.
    ///
    /// The registry entry is created immediately before the envelope is
    /// flushed; the decode loop removes it when the matching result
    /// arrives. `Close` is the sole fire-and-forget operation: it returns
    /// an empty success envelope without registering or waiting.
    ///
    /// # Errors
    ///
    /// - [`AppError::ConnectionClosed`] if the handle is already shutting
    ///   down, or the connection dies while the call is outstanding.
    /// - [`AppError::Io`] / [`AppError::Codec`] if the envelope cannot be
    ///   flushed.
    pub async fn call_raw(
        &self,
        function: &str,
        args: serde_json::Value,
    ) -> Result<ResultEnvelope> {
        let fire_and_forget = function == op::CLOSE;
        if !fire_and_forget && self.is_shutting_down() {
            return Err(AppError::ConnectionClosed(format!(
                "cannot call '{function}': handle is shutting down"
            )));
        }

        let envelope = CallEnvelope::new(function, args);
        let line = serde_json::to_string(&envelope)
            .map_err(|e| AppError::Protocol(format!("encode call envelope: {e}")))?;
        debug!(
            instance_id = %self.instance_id,
            id = %envelope.id,
            function,
            "sending call"
        );

        let rx = if fire_and_forget {
            None
        } else {
            Some(self.in_flight.register(&envelope.id).await)
        };

        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.send(line).await {
                if !fire_and_forget {
                    self.in_flight.forget(&envelope.id).await;
                }
                return Err(e);
            }
        }

        let Some(rx) = rx else {
            // Close expects no envelope back.
            return Ok(ResultEnvelope::success(
                &envelope.id,
                function,
                serde_json::Value::Null,
            ));
        };

        rx.await.map_err(|_| {
            AppError::ConnectionClosed("response channel closed before delivery".into())
        })
    }

    /// Invoke a remote operation with typed arguments and result.
    ///
    /// # Errors
    ///
    /// - [`AppError::Handler`] carrying the remote error message verbatim
    ///   when the result envelope reports a failure.
    /// - [`AppError::Cast`] when the result document does not fit `O`.
    /// - Any transport error from [`AgentHandle::call_raw`].
    pub async fn call<I, O>(&self, function: &str, args: &I) -> Result<O>
    where
        I: serde::Serialize,
        O: serde::de::DeserializeOwned,
    {
        let doc = cast::to_document(args)?;
        let envelope = self.call_raw(function, doc).await?;
        if envelope.is_error() {
            return Err(AppError::Handler(envelope.error));
        }
        cast::from_document(envelope.result)
    }

    /// Synchronous liveness no-op against the remote agent.
    ///
    /// # Errors
    ///
    /// Propagates any call failure; an error here during bootstrap fails
    /// the whole connection attempt.
    pub async fn ping(&self) -> Result<PingResult> {
        self.call(
            op::PING,
            &PingArgs {
                ping: "ping".to_owned(),
            },
        )
        .await
    }

    /// Fire-and-forget graceful shutdown request.
    ///
    /// # Errors
    ///
    /// Returns an error only if the envelope cannot be flushed.
    pub async fn close(&self) -> Result<()> {
        self.call_raw(op::CLOSE, serde_json::Value::Null)
            .await
            .map(|_| ())
    }

    /// Tear the connection down.
    ///
    /// Sets the shutting-down flag, sends `Close` (fire-and-forget), shuts
    /// the write half (the remote sees stdin end-of-stream and exits after
    /// draining, which ends the decode loop with an expected EOF), then
    /// waits for the decode loop and drains any stragglers.
    ///
    /// Repeated disconnects are a no-op.
    ///
    /// # Errors
    ///
    /// Currently infallible; the signature leaves room for transports whose
    /// teardown can fail.
    pub async fn disconnect(&self) -> Result<()> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!(instance_id = %self.instance_id, "disconnecting agent");

        if let Err(e) = self.call_raw(op::CLOSE, serde_json::Value::Null).await {
            warn!(instance_id = %self.instance_id, error = %e, "close envelope not delivered");
        }

        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.close().await {
                debug!(instance_id = %self.instance_id, error = %e, "write half already closed");
            }
        }

        // Stop the decode loop now rather than waiting for the remote side
        // to finish draining and close its stream.
        self.cancel.cancel();

        if let Some(task) = self.decode_task.lock().await.take() {
            let _ = task.await;
        }

        // The decode loop drains on exit; this covers callers that raced
        // their registration against loop termination.
        self.in_flight
            .drain("connection closed: agent disconnected")
            .await;

        Ok(())
    }
}

// ── Decode loop ───────────────────────────────────────────────────────────────

/// Single background reader for the lifetime of the connection.
///
/// Exit is irreversible: every exit path drains the registry so no caller
/// blocks on a dead connection.
async fn run_decode_loop(
    mut framed: FramedRead<BoxedReader, FrameCodec>,
    in_flight: Arc<InFlightRegistry>,
    shutting_down: Arc<AtomicBool>,
    cancel: CancellationToken,
    instance_id: String,
) {
    debug!(instance_id, "decode loop started");

    loop {
        let item = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(instance_id, "decode loop: cancellation received, stopping");
                break;
            }

            item = framed.next() => item,
        };

        match item {
            None => {
                if shutting_down.load(Ordering::SeqCst) {
                    debug!(instance_id, "decode loop: end of stream after shutdown request");
                } else {
                    warn!(instance_id, "decode loop: unexpected disconnect");
                }
                break;
            }

            Some(Err(AppError::Codec(msg))) => {
                // Oversized frame: the line is gone and carried no usable
                // id; skip it and keep serving other calls.
                warn!(instance_id, error = %msg, "decode loop: dropping unframeable result");
            }

            Some(Err(e)) => {
                if shutting_down.load(Ordering::SeqCst) {
                    debug!(instance_id, error = %e, "decode loop: stream error during shutdown");
                } else {
                    warn!(instance_id, error = %e, "decode loop: fatal stream error");
                }
                break;
            }

            Some(Ok(line)) => match serde_json::from_str::<ResultEnvelope>(&line) {
                Ok(envelope) => {
                    if envelope.id.is_empty() {
                        warn!(instance_id, "decode loop: result with empty id, discarding");
                    } else if !in_flight.deliver(envelope).await {
                        debug!(instance_id, "decode loop: orphaned result, discarding");
                    }
                }
                Err(e) => {
                    // Malformed envelope. With a recoverable id it becomes
                    // that call's error response; otherwise it is
                    // unroutable.
                    if let Some(id) = recover_id(&line) {
                        let synthetic = ResultEnvelope::failure(
                            &id,
                            "",
                            &format!("malformed result envelope: {e}"),
                        );
                        if !in_flight.deliver(synthetic).await {
                            debug!(instance_id, id, "decode loop: orphaned malformed result");
                        }
                    } else {
                        warn!(instance_id, error = %e, "decode loop: undecodable result, discarding");
                    }
                }
            },
        }
    }

    in_flight.drain("connection closed: agent stream ended").await;
    debug!(instance_id, "decode loop exited");
}

// ── Diagnostics mirror ────────────────────────────────────────────────────────

/// Mirror the remote agent's stderr into local logs, line by line.
async fn mirror_stderr(stderr: BoxedReader, instance_id: String) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(instance_id, agent_stderr = %line),
            Ok(None) => break,
            Err(e) => {
                debug!(instance_id, error = %e, "agent stderr mirror ended");
                break;
            }
        }
    }
}
