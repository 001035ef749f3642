//! Wire protocol: the Call/Result envelopes and the named operations they
//! carry.
//!
//! The transport is a single ordered byte stream (the SSH exec session's
//! stdin/stdout) carrying newline-delimited JSON envelopes — see
//! [`codec`] for framing. Both directions share the same envelope shapes;
//! writes are serialized by the owning side's write lock because the stream
//! offers no interleaving.

pub mod codec;

use serde::{Deserialize, Serialize};

/// Crate version, compared byte-for-byte against the remote binary's
/// self-identification banner to decide reinstall.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The banner `outpost-agent --version` prints, and the exact string the
/// bootstrap version probe expects back from an up-to-date installation.
#[must_use]
pub fn version_banner() -> String {
    format!("outpost-agent version {VERSION}")
}

// ── Operation names ───────────────────────────────────────────────────────────

/// Stable operation name constants.
///
/// Adding a name is a protocol-compatible, additive change; removing or
/// renaming one breaks any peer still using it.
pub mod op {
    /// Liveness no-op: echoes its payload and reports the agent pid.
    pub const PING: &str = "Ping";
    /// Run a command on the agent host.
    pub const EXEC: &str = "Exec";
    /// Stat a path on the agent host.
    pub const FILE_STAT: &str = "FileStat";
    /// Graceful shutdown. Fire-and-forget: no result envelope is sent.
    pub const CLOSE: &str = "Close";
}

// ── Envelopes ─────────────────────────────────────────────────────────────────

/// One outbound call frame: `{id, function, args}`.
///
/// `id` is assigned by the caller at send time and is unique for the
/// lifetime of the connection (128-bit random UUID).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEnvelope {
    /// Caller-assigned correlation identifier.
    #[serde(default)]
    pub id: String,
    /// Registered operation name.
    pub function: String,
    /// Untyped structured argument document.
    #[serde(default)]
    pub args: serde_json::Value,
}

impl CallEnvelope {
    /// Build a call envelope with a freshly generated correlation id.
    #[must_use]
    pub fn new(function: &str, args: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            function: function.to_owned(),
            args,
        }
    }
}

/// One inbound result frame: `{id, function, result, error}`.
///
/// Exactly one of `result`/`error` is meaningful; an empty `error` string
/// means success. The envelope echoes the `id` it answers, except that a
/// best-effort reply to an undecodable frame may carry an empty id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEnvelope {
    /// Correlation id of the call being answered.
    #[serde(default)]
    pub id: String,
    /// Operation name of the call being answered.
    #[serde(default)]
    pub function: String,
    /// Untyped structured result document.
    #[serde(default)]
    pub result: serde_json::Value,
    /// Handler or protocol error message; empty means success.
    #[serde(default)]
    pub error: String,
}

impl ResultEnvelope {
    /// Build a success envelope answering `id`.
    #[must_use]
    pub fn success(id: &str, function: &str, result: serde_json::Value) -> Self {
        Self {
            id: id.to_owned(),
            function: function.to_owned(),
            result,
            error: String::new(),
        }
    }

    /// Build an error envelope answering `id`.
    #[must_use]
    pub fn failure(id: &str, function: &str, error: &str) -> Self {
        Self {
            id: id.to_owned(),
            function: function.to_owned(),
            result: serde_json::Value::Null,
            error: error.to_owned(),
        }
    }

    /// Whether this envelope carries an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}

/// Best-effort extraction of a usable correlation id from a frame that
/// failed full envelope decoding.
///
/// A partially valid frame whose top-level `id` is a non-empty string can
/// still be answered (server side) or routed as that id's error response
/// (client side); anything else is unroutable.
#[must_use]
pub fn recover_id(line: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    match value.get("id") {
        Some(serde_json::Value::String(id)) if !id.is_empty() => Some(id.clone()),
        _ => None,
    }
}
