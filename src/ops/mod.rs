//! Built-in remote operations.
//!
//! Each operation is a plain async handler plus its argument/result shapes;
//! [`builtin_registry`] wires them into a [`FunctionRegistry`] under their
//! stable wire names. The shapes are shared with the client side, which
//! calls them through [`AgentHandle::call`](crate::client::AgentHandle::call).

pub mod exec;
pub mod file_stat;
pub mod ping;

use crate::proto::op;
use crate::server::FunctionRegistry;

/// Registry holding every operation the stock agent serves.
#[must_use]
pub fn builtin_registry() -> FunctionRegistry {
    let mut registry = FunctionRegistry::new();
    registry.register(op::PING, ping::ping);
    registry.register(op::EXEC, exec::exec);
    registry.register(op::FILE_STAT, file_stat::file_stat);
    registry
}
