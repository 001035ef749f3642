#![forbid(unsafe_code)]

//! Agentless remote-host management over SSH.
//!
//! The control side opens an SSH session, bootstraps the `outpost-agent`
//! binary on the target host, and exchanges typed RPC with it over the exec
//! session's stdin/stdout. stderr is a protocol-free diagnostic channel.

pub mod bootstrap;
pub mod cast;
pub mod client;
pub mod config;
pub mod errors;
pub mod ops;
pub mod proto;
pub mod server;
pub mod transport;

pub use config::GlobalConfig;
pub use errors::{AppError, BootstrapStage, Result};
