//! sqlgate - a guarded SQL gateway for PostgreSQL.
//!
//! Every query passes through one safety and resource-control layer before
//! it reaches the database:
//! - read/write classification against a process-wide write policy
//! - parameter binding through the driver, never string interpolation
//! - per-statement timeouts and automatic row caps
//! - a bounded connection pool that discards connections in doubt
//!
//! Catalog introspection helpers and raw queries are exposed as named
//! operations, served to MCP clients by [`mcp::GatewayServer`].

pub mod core;
pub mod dispatch;
pub mod execution;
pub mod introspection;
pub mod mcp;

pub use crate::core::{ErrorKind, GatewayConfig, GatewayError, QueryRequest, QueryResult};
pub use crate::dispatch::{DispatchError, Dispatcher};
pub use crate::execution::{ConnectionPool, ExecutionGuard};
pub use crate::mcp::GatewayServer;
