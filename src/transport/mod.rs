//! MCP transport implementations
//!
//! A transport moves opaque JSON-RPC envelopes in both directions:
//!
//! - `stdio` - newline-delimited JSON over byte streams (stdin/stdout)
//! - `sse` - SSE event stream for inbound traffic, HTTP POST for outbound
//! - `sse_server` - the axum-based server counterpart of `sse`
//!
//! ## Synchronization
//!
//! Every transport serializes its write side, so envelopes reach the wire
//! in the order `send` calls complete. Inbound envelopes are handed to the
//! connect handler in wire order; each handler invocation runs on its own
//! task so the read path never blocks on user code.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::codec::Message;
use crate::error::Result;

pub mod sse;
pub mod sse_server;
pub mod stdio;

pub use sse::{SseClientTransport, SseTransportBuilder};
pub use sse_server::SseServerTransport;
pub use stdio::StdioTransport;

/// A boxed future returned by handler seams
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Handler invoked for every inbound envelope.
///
/// Returns the response envelope to put back on the wire, or `None` for
/// notifications and correlation-only traffic. The transport awaits the
/// future on a spawned task and writes any returned envelope through its
/// own serialized send path.
pub type InboundHandler = Arc<dyn Fn(Message) -> BoxFuture<'static, Option<Message>> + Send + Sync>;

/// Contract for moving envelopes between session peers.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open the channel and begin delivering inbound envelopes to `handler`.
    async fn connect(&self, handler: InboundHandler) -> Result<()>;

    /// Deliver one envelope; completes when the bytes are flushed to the
    /// wire. Fails with [`Error::TransportClosed`](crate::Error::TransportClosed)
    /// after [`close`](Transport::close).
    async fn send(&self, message: Message) -> Result<()>;

    /// Begin graceful shutdown: suppress further handler invocations and
    /// reject subsequent `send` calls.
    async fn close(&self) -> Result<()>;
}
