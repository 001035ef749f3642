//! Remote-side RPC server.
//!
//! The [`Dispatcher`] decodes call envelopes sequentially from the inbound
//! stream and fans each one out to a concurrent handler task looked up in
//! the [`FunctionRegistry`]. Results are encoded back under a shared write
//! lock so frames never interleave on the outbound stream.

pub mod dispatcher;
pub mod registry;

pub use dispatcher::Dispatcher;
pub use registry::FunctionRegistry;
