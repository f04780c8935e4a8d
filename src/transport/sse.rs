//! SSE + HTTP POST client transport
//!
//! Implements the HTTP-with-SSE MCP transport from the client side. Two
//! channels share one logical connection:
//!
//! - a long-lived `GET <base><sse_endpoint>` event stream carrying
//!   server-to-client envelopes, and
//! - per-message HTTP POSTs carrying client-to-server envelopes.
//!
//! The server announces where POSTs go at runtime: the first event on the
//! stream has type `endpoint` and carries the relative POST URL. `send`
//! blocks on that discovery (10 s by default) before the first POST.
//!
//! Two event types are consumed: `endpoint` (one-shot) and `message` (zero
//! or more JSON-RPC envelopes). Anything else is logged and discarded.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use url::Url;

use crate::codec::{JsonCodec, Message};
use crate::error::{Error, Result};
use crate::transport::{InboundHandler, Transport};

/// SSE event type for JSON-RPC envelopes
const MESSAGE_EVENT_TYPE: &str = "message";

/// SSE event type for POST endpoint discovery
const ENDPOINT_EVENT_TYPE: &str = "endpoint";

/// Default SSE endpoint path
pub const DEFAULT_SSE_ENDPOINT: &str = "/sse";

/// Default time to wait for the `endpoint` event before failing a send
pub const DEFAULT_ENDPOINT_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// SSE event parsing
// =============================================================================

/// A parsed Server-Sent Event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub id: Option<String>,
    /// Event type; `"message"` when the stream does not specify one
    pub event: String,
    pub data: String,
}

/// Incremental SSE field parser.
///
/// Feed it one line at a time; an event is produced at each blank line.
/// Multi-line `data` fields are joined with `"\n"`, comment lines
/// (leading `:`) and unknown fields are ignored.
#[derive(Debug, Default)]
pub struct SseEventParser {
    id: Option<String>,
    event: Option<String>,
    data_lines: Vec<String>,
}

impl SseEventParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one line (without its trailing newline). Returns a complete
    /// event when the line terminates one.
    pub fn push_line(&mut self, line: &str) -> Option<SseEvent> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            return self.flush();
        }
        if line.starts_with(':') {
            return None;
        }

        if let Some(value) = line.strip_prefix("data:") {
            self.data_lines.push(value.trim_start().to_string());
        } else if let Some(value) = line.strip_prefix("event:") {
            self.event = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("id:") {
            self.id = Some(value.trim().to_string());
        }
        None
    }

    /// Emit any buffered event, e.g. when the stream ends without a final
    /// blank line.
    pub fn flush(&mut self) -> Option<SseEvent> {
        if self.data_lines.is_empty() {
            self.id = None;
            self.event = None;
            return None;
        }
        let event = SseEvent {
            id: self.id.take(),
            event: self
                .event
                .take()
                .unwrap_or_else(|| MESSAGE_EVENT_TYPE.to_string()),
            data: self.data_lines.join("\n"),
        };
        self.data_lines.clear();
        Some(event)
    }
}

// =============================================================================
// Transport
// =============================================================================

/// Builder for [`SseClientTransport`].
pub struct SseTransportBuilder {
    base_url: Url,
    sse_endpoint: String,
    endpoint_timeout: Duration,
    http: Option<reqwest::Client>,
    codec: JsonCodec,
}

impl SseTransportBuilder {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            sse_endpoint: DEFAULT_SSE_ENDPOINT.to_string(),
            endpoint_timeout: DEFAULT_ENDPOINT_TIMEOUT,
            http: None,
            codec: JsonCodec::new(),
        }
    }

    /// Override the SSE endpoint path (default `/sse`).
    pub fn sse_endpoint(mut self, path: impl Into<String>) -> Self {
        self.sse_endpoint = path.into();
        self
    }

    /// Override how long `send` waits for endpoint discovery (default 10 s).
    pub fn endpoint_timeout(mut self, timeout: Duration) -> Self {
        self.endpoint_timeout = timeout;
        self
    }

    /// Use a pre-configured HTTP client.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    pub fn codec(mut self, codec: JsonCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn build(self) -> SseClientTransport {
        let (endpoint_tx, endpoint_rx) = watch::channel(None);
        SseClientTransport {
            inner: Arc::new(SseInner {
                http: self.http.unwrap_or_default(),
                base_url: self.base_url,
                sse_endpoint: self.sse_endpoint,
                endpoint_timeout: self.endpoint_timeout,
                codec: self.codec,
                closing: AtomicBool::new(false),
                endpoint_tx,
                endpoint_rx,
            }),
            stream_task: std::sync::Mutex::new(None),
        }
    }
}

struct SseInner {
    http: reqwest::Client,
    base_url: Url,
    sse_endpoint: String,
    endpoint_timeout: Duration,
    codec: JsonCodec,
    closing: AtomicBool,
    endpoint_tx: watch::Sender<Option<Url>>,
    endpoint_rx: watch::Receiver<Option<Url>>,
}

impl SseInner {
    /// Await endpoint discovery, then POST one envelope.
    async fn post_message(&self, message: &Message) -> Result<()> {
        if self.closing.load(Ordering::Acquire) {
            return Err(Error::TransportClosed);
        }

        let mut rx = self.endpoint_rx.clone();
        let wait = rx.wait_for(|endpoint| endpoint.is_some());
        let endpoint = match tokio::time::timeout(self.endpoint_timeout, wait).await {
            Ok(Ok(endpoint)) => endpoint.clone().expect("checked by wait_for"),
            Ok(Err(_)) => {
                // The stream task dropped the sender; observably identical
                // to a discovery timeout, so only the log differs.
                tracing::debug!("endpoint wait interrupted by stream shutdown");
                return Err(Error::Mcp("failed to wait for message endpoint".into()));
            }
            Err(_) => {
                tracing::warn!(
                    timeout = ?self.endpoint_timeout,
                    "timed out waiting for message endpoint"
                );
                return Err(Error::Mcp("failed to wait for message endpoint".into()));
            }
        };

        let body = self.codec.encode(message)?;
        tracing::trace!(endpoint = %endpoint, body = %body, "posting message");

        let response = self
            .http
            .post(endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("failed to send message: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport(format!(
                "message endpoint returned {}",
                status
            )));
        }
        // Responses arrive on the event stream, never in the POST body.
        Ok(())
    }
}

/// Route one parsed SSE event: endpoint discovery, an envelope, or noise.
fn handle_event(inner: &Arc<SseInner>, event: SseEvent, handler: &InboundHandler) {
    if inner.closing.load(Ordering::Acquire) {
        return;
    }

    match event.event.as_str() {
        ENDPOINT_EVENT_TYPE => {
            let resolved = match inner.base_url.join(event.data.trim()) {
                Ok(url) => url,
                Err(e) => {
                    tracing::error!(endpoint = %event.data, error = %e, "invalid endpoint event");
                    return;
                }
            };
            tracing::debug!(endpoint = %resolved, "discovered message endpoint");
            let _ = inner.endpoint_tx.send(Some(resolved));
        }
        MESSAGE_EVENT_TYPE => {
            let message = match inner.codec.decode(&event.data) {
                Ok(message) => message,
                Err(e) => {
                    tracing::error!(error = %e, "error processing SSE message event");
                    return;
                }
            };
            let inner = inner.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                if let Some(response) = handler(message).await {
                    if let Err(e) = inner.post_message(&response).await {
                        tracing::debug!(error = %e, "failed to post handler response");
                    }
                }
            });
        }
        other => {
            tracing::warn!(event_type = %other, "received unrecognized SSE event type");
        }
    }
}

/// MCP client transport over SSE + HTTP POST.
///
/// # Example
///
/// ```rust,no_run
/// use duplex_mcp::transport::sse::SseClientTransport;
/// use url::Url;
///
/// let transport = SseClientTransport::builder(Url::parse("http://localhost:3000").unwrap())
///     .sse_endpoint("/sse")
///     .build();
/// ```
pub struct SseClientTransport {
    inner: Arc<SseInner>,
    stream_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SseClientTransport {
    pub fn builder(base_url: Url) -> SseTransportBuilder {
        SseTransportBuilder::new(base_url)
    }
}

#[async_trait::async_trait]
impl Transport for SseClientTransport {
    async fn connect(&self, handler: InboundHandler) -> Result<()> {
        let stream_url = self
            .inner
            .base_url
            .join(&self.inner.sse_endpoint)
            .map_err(|e| Error::Transport(format!("invalid SSE endpoint: {}", e)))?;

        let response = self
            .inner
            .http
            .get(stream_url.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| Error::Transport(format!("failed to open SSE stream: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport(format!(
                "SSE endpoint returned {}",
                status
            )));
        }

        tracing::debug!(url = %stream_url, "SSE stream connected");

        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut parser = SseEventParser::new();
            let mut buffer = String::new();

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        if !inner.closing.load(Ordering::Acquire) {
                            tracing::error!(error = %e, "SSE connection error");
                        }
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // Feed whole lines to the parser, keeping any partial tail.
                while let Some(newline) = buffer.find('\n') {
                    let line: String = buffer.drain(..=newline).collect();
                    if let Some(event) = parser.push_line(line.trim_end_matches('\n')) {
                        handle_event(&inner, event, &handler);
                    }
                }
            }

            if let Some(event) = parser.flush() {
                handle_event(&inner, event, &handler);
            }
            tracing::debug!("SSE stream ended");
        });

        *self.stream_task.lock().expect("task lock poisoned") = Some(task);
        Ok(())
    }

    async fn send(&self, message: Message) -> Result<()> {
        self.inner.post_message(&message).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.closing.store(true, Ordering::Release);
        if let Some(task) = self.stream_task.lock().expect("task lock poisoned").take() {
            task.abort();
        }
        Ok(())
    }
}
