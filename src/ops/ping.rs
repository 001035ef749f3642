//! Liveness no-op.
//!
//! Echoes its payload back with a `pong` and the agent's pid. Bootstrap
//! uses it as the post-launch liveness check; the client heartbeat reuses
//! it on an interval.

use serde::{Deserialize, Serialize};

use crate::Result;

/// `Ping` arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingArgs {
    /// Arbitrary payload echoed back.
    pub ping: String,
}

/// `Ping` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResult {
    /// The payload that was sent.
    pub ping: String,
    /// Always `"pong"`.
    pub pong: String,
    /// Pid of the serving agent process.
    pub pid: u32,
}

/// Handle one `Ping` call.
///
/// # Errors
///
/// Infallible; the signature matches the registry's handler contract.
pub async fn ping(args: PingArgs) -> Result<PingResult> {
    Ok(PingResult {
        ping: args.ping,
        pong: "pong".to_owned(),
        pid: std::process::id(),
    })
}
