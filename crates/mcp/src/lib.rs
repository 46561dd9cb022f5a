//! # rago-mcp
//!
//! Client side of the tool server protocol: stdio and streamable HTTP
//! transports, JSON-RPC correlation, and the [`ServerManager`] that owns
//! every server's lifecycle.

pub mod client;
pub mod content;
pub mod jsonrpc;
pub mod manager;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod test_support;

pub use client::{RemoteTool, RpcClient, ServerInfo, ServerNotice};
pub use content::{normalize_result, tool_error};
pub use jsonrpc::Frame;
pub use manager::{InstanceObserver, ServerHealth, ServerManager};
pub use transport::{DefaultTransportFactory, Transport, TransportFactory};
