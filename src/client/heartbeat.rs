//! Background heartbeat for a connected agent.
//!
//! Pings once per interval and forces a disconnect when a ping fails or
//! times out, so a dead SSH session is noticed without waiting for the next
//! real call. Stops silently once the handle starts shutting down.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::AgentHandle;

/// Spawn the heartbeat task for `handle`.
///
/// The task pings every `interval`, bounding each ping by the same
/// interval. Dropping the returned handle detaches the task; it exits on
/// its own when the connection shuts down.
#[must_use]
pub fn spawn_heartbeat(handle: Arc<AgentHandle>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            if handle.is_shutting_down() {
                debug!(instance_id = %handle.instance_id(), "heartbeat: handle shut down, stopping");
                return;
            }

            match tokio::time::timeout(interval, handle.ping()).await {
                Ok(Ok(_)) => {
                    debug!(instance_id = %handle.instance_id(), "heartbeat ok");
                }
                Ok(Err(e)) => {
                    if handle.is_shutting_down() {
                        return;
                    }
                    warn!(instance_id = %handle.instance_id(), error = %e, "heartbeat failed, disconnecting");
                    let _ = handle.disconnect().await;
                    return;
                }
                Err(_elapsed) => {
                    if handle.is_shutting_down() {
                        return;
                    }
                    warn!(instance_id = %handle.instance_id(), "heartbeat timed out, disconnecting");
                    let _ = handle.disconnect().await;
                    return;
                }
            }
        }
    })
}
