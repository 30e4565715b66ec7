//! MCP tool-server plumbing for askr.
//!
//! - [`transport`]: JSON-RPC channels over stdio, SSE and streamable HTTP.
//! - [`TransportConnector`]: the handshake, tool listing and tool calls over
//!   any channel, with one reconnect for network transports.
//! - [`ServerLifecycleManager`]: bounded-parallel startup, per-server status
//!   and exhaustive teardown.
//! - [`ToolCatalog`]: the aggregated, collision-free tool namespace.

/// Tool aggregation and routing.
pub mod catalog;
/// Connector contract and the MCP client logic.
pub mod connector;
/// Transport-level error type.
pub mod error;
/// Server lifecycle management and tool dispatch.
pub mod manager;
/// JSON-RPC and MCP message types.
pub mod protocol;
/// Server-sent events decoding.
pub mod sse;
/// Transport implementations.
pub mod transport;

pub use catalog::{visible_name, ToolCatalog, ToolDescriptor};
pub use connector::{ConnectorFactory, McpConnector, McpConnectorFactory, TransportConnector};
pub use error::RpcError;
pub use manager::{
    ConnectedServer, ServerLifecycleManager, ServerStatus, ToolDispatcher,
    DEFAULT_STARTUP_PARALLELISM,
};
pub use protocol::McpToolDef;
