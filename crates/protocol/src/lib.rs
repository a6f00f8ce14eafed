//! Tool-server client for refdesk.
//!
//! Speaks the Model Context Protocol flavour of JSON-RPC 2.0 over a
//! newline-delimited byte stream:
//!
//! - [`transport`] opens connections (child process stdio, or any pipe)
//! - [`jsonrpc`] holds the wire types
//! - [`schema`] and [`registry`] keep discovered tools and validate arguments
//! - [`client`] runs the handshake, correlates requests, and recovers from
//!   connection loss
//!
//! [`ProtocolClient`] implements [`refdesk_core::ToolExecutor`], which is all
//! the reasoning loop sees.

pub mod client;
pub mod jsonrpc;
pub mod registry;
pub mod schema;
pub mod transport;

pub use client::{ClientOptions, ConnectionStatus, ProtocolClient};
pub use registry::{RegisteredTool, ToolRegistry};
pub use schema::ArgumentSchema;
pub use transport::{Connection, Connector, StdioConnector};
