//! Stdio transport for MCP
//!
//! Reads newline-delimited JSON-RPC envelopes from a byte stream and writes
//! envelopes back one per line. The default constructor wires the current
//! process's stdin/stdout; [`StdioTransport::new`] accepts any reader/writer
//! pair, which is what the in-memory test harness uses.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::codec::{JsonCodec, Message, Response};
use crate::error::{Error, Result};
use crate::protocol::RequestId;
use crate::transport::{InboundHandler, Transport};

type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct StdioInner {
    codec: JsonCodec,
    writer: Mutex<BoxWriter>,
    closing: AtomicBool,
}

impl StdioInner {
    /// Write one envelope as a single line and flush.
    async fn write_message(&self, message: &Message) -> Result<()> {
        let line = self.codec.encode(message)?;
        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::Transport(format!("failed to write: {}", e)))?;
        writer
            .write_all(b"\n")
            .await
            .map_err(|e| Error::Transport(format!("failed to write newline: {}", e)))?;
        writer
            .flush()
            .await
            .map_err(|e| Error::Transport(format!("failed to flush: {}", e)))?;
        Ok(())
    }
}

/// Newline-delimited JSON transport over a byte stream pair.
pub struct StdioTransport {
    inner: Arc<StdioInner>,
    reader: std::sync::Mutex<Option<BoxReader>>,
    read_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl StdioTransport {
    /// Create a transport over an arbitrary reader/writer pair.
    pub fn new<R, W>(reader: R, writer: W, codec: JsonCodec) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            inner: Arc::new(StdioInner {
                codec,
                writer: Mutex::new(Box::new(writer)),
                closing: AtomicBool::new(false),
            }),
            reader: std::sync::Mutex::new(Some(Box::new(reader))),
            read_task: std::sync::Mutex::new(None),
        }
    }

    /// Create a transport over the current process's stdin and stdout.
    pub fn stdio(codec: JsonCodec) -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout(), codec)
    }
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    async fn connect(&self, handler: InboundHandler) -> Result<()> {
        let reader = self
            .reader
            .lock()
            .expect("reader lock poisoned")
            .take()
            .ok_or_else(|| Error::Transport("transport already connected".to_string()))?;

        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        tracing::debug!("input stream closed, stopping reader");
                        break;
                    }
                    Err(e) => {
                        if !inner.closing.load(Ordering::Acquire) {
                            tracing::error!(error = %e, "failed to read from transport");
                        }
                        break;
                    }
                };

                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if inner.closing.load(Ordering::Acquire) {
                    break;
                }

                tracing::trace!(input = %trimmed, "received message");

                let message = match inner.codec.decode(trimmed) {
                    Ok(message) => message,
                    Err(e) => {
                        // Refuse with a response when the raw text still
                        // carries a correlatable id; otherwise drop.
                        if let Some(id) = extract_id(trimmed) {
                            let response = Response::error(id, e.to_wire());
                            if let Err(send_err) =
                                inner.write_message(&Message::Response(response)).await
                            {
                                tracing::debug!(error = %send_err, "failed to send decode error");
                            }
                        } else {
                            tracing::warn!(error = %e, "dropping unparseable message");
                        }
                        continue;
                    }
                };

                // Handlers run off the read path; responses re-enter the
                // serialized writer.
                let inner = inner.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    if let Some(response) = handler(message).await {
                        if inner.closing.load(Ordering::Acquire) {
                            return;
                        }
                        if let Err(e) = inner.write_message(&response).await {
                            tracing::debug!(error = %e, "failed to write response");
                        }
                    }
                });
            }
        });

        *self.read_task.lock().expect("task lock poisoned") = Some(task);
        Ok(())
    }

    async fn send(&self, message: Message) -> Result<()> {
        if self.inner.closing.load(Ordering::Acquire) {
            return Err(Error::TransportClosed);
        }
        self.inner.write_message(&message).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.closing.store(true, Ordering::Release);
        if let Some(task) = self.read_task.lock().expect("task lock poisoned").take() {
            task.abort();
        }
        let mut writer = self.inner.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            tracing::debug!(error = %e, "error shutting down writer");
        }
        Ok(())
    }
}

/// Best-effort id extraction from text the codec rejected.
fn extract_id(text: &str) -> Option<RequestId> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    serde_json::from_value(value.get("id")?.clone()).ok()
}
