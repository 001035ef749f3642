//! The dispatcher: sequential decode, concurrent handlers, serialized
//! replies.
//!
//! One reader consumes the inbound stream (mandatory — it is a single
//! ordered byte sequence). Each accepted call becomes an independent task,
//! so a slow handler never blocks the others. `Close` is the drain barrier:
//! every already-accepted call gets its reply before the serve loop
//! returns, and no reply is sent for `Close` itself.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::proto::codec::FrameCodec;
use crate::proto::{op, recover_id, CallEnvelope, ResultEnvelope};
use crate::server::registry::FunctionRegistry;
use crate::{AppError, Result};

/// Serves call envelopes from an inbound stream until `Close` or
/// end-of-stream.
#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<FunctionRegistry>,
}

impl Dispatcher {
    /// Create a dispatcher over a populated registry.
    #[must_use]
    pub fn new(registry: FunctionRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// Run the serve loop over the given stream halves.
    ///
    /// Behavior per decoded frame:
    /// - empty `id`: protocol violation — an error envelope is sent
    ///   immediately and serving continues; no handler is spawned.
    /// - `Close`: waits for all in-flight handler tasks, then returns
    ///   without a reply.
    /// - anything else: spawns a handler task that resolves the function,
    ///   casts args, runs the handler, and encodes the reply under the
    ///   write lock.
    ///
    /// A malformed frame is answered only when an id can be recovered from
    /// the partial JSON; otherwise it is logged and skipped. End-of-stream
    /// terminates the loop after draining in-flight handlers.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] only for unrecoverable failures of the
    /// inbound stream itself.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Send + Unpin,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let mut inbound = FramedRead::new(reader, FrameCodec::new());
        let outbound = Arc::new(Mutex::new(FramedWrite::new(writer, FrameCodec::new())));
        let in_flight = TaskTracker::new();

        loop {
            debug!("waiting for next call");
            match inbound.next().await {
                None => {
                    info!("inbound stream ended, stopping dispatcher");
                    break;
                }

                Some(Err(AppError::Codec(msg))) => {
                    // Oversized frame: the line is unrecoverable and no id
                    // survives; keep serving.
                    warn!(error = %msg, "dropping unframeable call");
                }

                Some(Err(e)) => {
                    warn!(error = %e, "fatal inbound stream error, stopping dispatcher");
                    break;
                }

                Some(Ok(line)) => {
                    let call: CallEnvelope = match serde_json::from_str(&line) {
                        Ok(call) => call,
                        Err(e) => {
                            if let Some(id) = recover_id(&line) {
                                warn!(id, error = %e, "malformed call envelope");
                                send_envelope(
                                    &outbound,
                                    ResultEnvelope::failure(
                                        &id,
                                        "",
                                        &format!("malformed call envelope: {e}"),
                                    ),
                                )
                                .await;
                            } else {
                                warn!(error = %e, "undecodable call, skipping");
                            }
                            continue;
                        }
                    };

                    if call.id.is_empty() {
                        warn!(function = %call.function, "call id is empty");
                        send_envelope(
                            &outbound,
                            ResultEnvelope::failure("", &call.function, "call id is empty"),
                        )
                        .await;
                        continue;
                    }

                    if call.function == op::CLOSE {
                        info!("received close, waiting for in-flight handlers");
                        in_flight.close();
                        in_flight.wait().await;
                        info!("closing");
                        return Ok(());
                    }

                    let registry = Arc::clone(&self.registry);
                    let outbound = Arc::clone(&outbound);
                    in_flight.spawn(handle_call(registry, outbound, call));
                }
            }
        }

        // EOF path: the peer vanished without Close. Drain anyway so every
        // accepted call still gets its reply flushed.
        in_flight.close();
        in_flight.wait().await;
        Ok(())
    }
}

/// One handler task: route, invoke, reply.
async fn handle_call<W>(
    registry: Arc<FunctionRegistry>,
    outbound: Arc<Mutex<FramedWrite<W, FrameCodec>>>,
    call: CallEnvelope,
) where
    W: AsyncWrite + Send + Unpin,
{
    debug!(id = %call.id, function = %call.function, "routing call");

    let envelope = match registry.invoke(&call.function, call.args).await {
        Ok(result) => ResultEnvelope::success(&call.id, &call.function, result),
        Err(e) => {
            warn!(id = %call.id, function = %call.function, error = %e, "handler failed");
            ResultEnvelope::failure(&call.id, &call.function, &e.to_string())
        }
    };

    debug!(id = %call.id, function = %call.function, "sending result");
    send_envelope(&outbound, envelope).await;
}

/// Encode one envelope under the shared write lock; failures are logged,
/// never fatal to the serve loop.
async fn send_envelope<W>(outbound: &Mutex<FramedWrite<W, FrameCodec>>, envelope: ResultEnvelope)
where
    W: AsyncWrite + Send + Unpin,
{
    let line = match serde_json::to_string(&envelope) {
        Ok(line) => line,
        Err(e) => {
            warn!(id = %envelope.id, error = %e, "failed to encode result envelope");
            return;
        }
    };

    if let Err(e) = outbound.lock().await.send(line).await {
        warn!(id = %envelope.id, error = %e, "failed to write result envelope");
    }
}
