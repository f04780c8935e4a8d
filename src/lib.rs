//! # duplex-mcp
//!
//! Bidirectional Model Context Protocol (MCP) implementation: a JSON-RPC
//! 2.0 session layer with client and server roles over pluggable
//! transports.
//!
//! Either side of a connection may originate requests; responses and
//! notifications flow in both directions on the same logical channel. The
//! [`Session`] at the core correlates outbound requests with inbound
//! responses by id, dispatches inbound traffic to registered handlers, and
//! enforces the MCP lifecycle. [`McpClient`] and [`McpServer`] are thin
//! façades plugging role-specific handlers into the same session.
//!
//! ## Example
//!
//! ```rust,ignore
//! use duplex_mcp::{CallToolResult, McpClient, McpServer, ToolBuilder};
//! use duplex_mcp::transport::StdioTransport;
//!
//! #[derive(serde::Deserialize, schemars::JsonSchema)]
//! struct EchoInput { text: String }
//!
//! # async fn run() -> duplex_mcp::Result<()> {
//! let echo = ToolBuilder::new("echo")
//!     .description("Echo the input text")
//!     .handler(|_exchange, input: EchoInput| async move {
//!         Ok(CallToolResult::text(input.text))
//!     });
//!
//! let server = McpServer::builder()
//!     .server_info("echo-server", "1.0.0")
//!     .tool(echo)
//!     .serve(StdioTransport::stdio(Default::default()))
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Transports
//!
//! - [`transport::StdioTransport`] - newline-delimited JSON over byte streams
//! - [`transport::SseClientTransport`] - SSE event stream + HTTP POST
//! - [`transport::SseServerTransport`] - the serving side of the SSE pair

pub mod blocking;
pub mod client;
pub mod codec;
pub mod error;
pub mod exchange;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

// Re-exports
pub use client::{McpClient, McpClientBuilder};
pub use codec::{JsonCodec, Message, Notification, Request, Response};
pub use error::{Error, ErrorCode, JsonRpcError, Result};
pub use exchange::Exchange;
pub use protocol::{
    CallToolResult, ClientCapabilities, Content, Implementation, InitializeResult, LoggingLevel,
    RequestId, ResourceContents, Root, ServerCapabilities, Tool,
};
pub use server::{
    CompletionSpec, McpServer, McpServerBuilder, PromptSpec, ResourceSpec, ToolBuilder, ToolSpec,
};
pub use session::{Peer, Session, SessionBuilder, SessionPhase};
pub use transport::Transport;
