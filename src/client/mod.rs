//! Control-side RPC client.
//!
//! [`AgentHandle`] owns the exec-session streams, the outbound encoder, the
//! inbound decode loop, and the correlation registry. Callers invoke
//! [`AgentHandle::call`] concurrently; the decode loop routes each result
//! envelope to the caller that sent the matching id.

pub mod handle;
pub mod heartbeat;
pub mod registry;

pub use handle::AgentHandle;
pub use registry::InFlightRegistry;
