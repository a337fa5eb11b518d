//! # CmdMux MCP Library
//!
//! Multi-server protocol client for CmdMux.
//!
//! This crate provides:
//! - A JSON-RPC shaped message envelope with opaque payloads
//! - Transport and connector contracts (no concrete wire transports)
//! - Per-server connection state machine with generation tracking
//! - `ProtocolClient`: parallel connect, request correlation, timeouts and
//!   capability caching
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         ProtocolClient                           │
//! │                                                                  │
//! │   "github" → Connection { status, generation, pending ids }      │
//! │   "fs"     → Connection { status, generation, pending ids }      │
//! │                                                                  │
//! │   TtlCache<CacheKey, Vec<ToolDescriptor>>      (tools/list)      │
//! │   TtlCache<CacheKey, Vec<ResourceDescriptor>>  (resources/list)  │
//! └──────────────────────────────────────────────────────────────────┘
//!                │ Connector::connect(name)
//!                ▼
//!        Arc<dyn Transport>  ── send(Message) / on_message(handler)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cmdmux_mcp::{ClientSettings, ConnectOptions, ProtocolClient};
//!
//! let client = ProtocolClient::new(
//!     [("github", github_connector), ("fs", fs_connector)],
//!     ClientSettings::default(),
//!     event_bus.sender(),
//! );
//!
//! let report = client
//!     .connect(None, ConnectOptions::default().require(["github"]))
//!     .await?;
//!
//! let tools = client.list_tools(None).await?;
//! let result = client.call_tool("github", "search_code", json!({ "query": "rust" })).await?;
//! ```

mod client;
mod connection;
pub mod error;
pub mod features;
pub mod protocol;
pub mod transport;

pub use client::{
    ClientSettings, ConnectOptions, ConnectReport, ProtocolClient, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_REQUEST_TIMEOUT, PROTOCOL_VERSION,
};
pub use error::ProtocolError;
pub use features::{
    resolve_qualified_name, CacheKey, Implementation, ResourceContents, ResourceDescriptor,
    ServerInfo, ToolCallResult, ToolContent, ToolDescriptor,
};
pub use protocol::{Message, Notification, Request, RequestId, Response, RpcError};
pub use transport::{Connector, InboundHandler, Transport, TransportError, TransportEvent};
