//! SSE server transport
//!
//! The server-side counterpart of [`SseClientTransport`](super::sse::SseClientTransport):
//! a bound HTTP listener that
//!
//! - answers `GET /sse` with a `text/event-stream` whose first event is the
//!   `endpoint` event carrying the POST path (with a per-session token),
//!   followed by one `message` event per outbound envelope, and
//! - accepts client envelopes as `POST /message?sessionId=<token>`,
//!   replying `202 Accepted` once the envelope is handed to the session.
//!
//! One transport instance carries one session. A second concurrent SSE
//! subscriber is refused with `409 Conflict`; multi-session routing belongs
//! to a host framework, not this transport.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use url::Url;
use uuid::Uuid;

use crate::codec::{JsonCodec, Message};
use crate::error::{Error, Result};
use crate::transport::{InboundHandler, Transport};

/// Default path the SSE stream is served from
pub const DEFAULT_SSE_PATH: &str = "/sse";

/// Default path POSTed envelopes are accepted on
pub const DEFAULT_MESSAGE_PATH: &str = "/message";

/// Outbound queue depth per connected client
const OUTBOUND_BUFFER: usize = 64;

struct ServerState {
    codec: JsonCodec,
    message_path: String,
    session_id: String,
    closing: AtomicBool,
    handler: std::sync::RwLock<Option<InboundHandler>>,
    /// Pre-encoded envelopes queued for the SSE stream
    client_tx: std::sync::Mutex<Option<mpsc::Sender<String>>>,
}

impl ServerState {
    fn queue_for_client(&self, encoded: String) -> Result<()> {
        let tx = self
            .client_tx
            .lock()
            .expect("client lock poisoned")
            .clone()
            .ok_or_else(|| Error::Transport("no client subscribed".to_string()))?;
        tx.try_send(encoded)
            .map_err(|e| Error::Transport(format!("failed to queue message: {}", e)))
    }
}

/// Single-session SSE server transport bound to a local address.
pub struct SseServerTransport {
    state: Arc<ServerState>,
    local_addr: SocketAddr,
    serve_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SseServerTransport {
    /// Bind the listener and start serving the SSE and message routes.
    pub async fn bind(addr: SocketAddr, codec: JsonCodec) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Transport(format!("failed to bind {}: {}", addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::Transport(format!("failed to read local addr: {}", e)))?;

        let state = Arc::new(ServerState {
            codec,
            message_path: DEFAULT_MESSAGE_PATH.to_string(),
            session_id: Uuid::new_v4().to_string(),
            closing: AtomicBool::new(false),
            handler: std::sync::RwLock::new(None),
            client_tx: std::sync::Mutex::new(None),
        });

        let router = Router::new()
            .route(DEFAULT_SSE_PATH, get(sse_handler))
            .route(DEFAULT_MESSAGE_PATH, post(message_handler))
            .with_state(state.clone());

        let serve_task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!(error = %e, "SSE server stopped");
            }
        });

        tracing::debug!(addr = %local_addr, "SSE server transport listening");

        Ok(Self {
            state,
            local_addr,
            serve_task: std::sync::Mutex::new(Some(serve_task)),
        })
    }

    /// The address the listener actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Base URL clients should resolve the SSE path against.
    pub fn base_url(&self) -> Url {
        Url::parse(&format!("http://{}", self.local_addr)).expect("bound addr forms a valid URL")
    }
}

#[async_trait::async_trait]
impl Transport for SseServerTransport {
    async fn connect(&self, handler: InboundHandler) -> Result<()> {
        let mut slot = self.state.handler.write().expect("handler lock poisoned");
        if slot.is_some() {
            return Err(Error::Transport("transport already connected".to_string()));
        }
        *slot = Some(handler);
        Ok(())
    }

    async fn send(&self, message: Message) -> Result<()> {
        if self.state.closing.load(Ordering::Acquire) {
            return Err(Error::TransportClosed);
        }
        let encoded = self.state.codec.encode(&message)?;
        self.state.queue_for_client(encoded)
    }

    async fn close(&self) -> Result<()> {
        self.state.closing.store(true, Ordering::Release);
        // Dropping the sender ends the client's event stream.
        self.state
            .client_tx
            .lock()
            .expect("client lock poisoned")
            .take();
        if let Some(task) = self
            .serve_task
            .lock()
            .expect("task lock poisoned")
            .take()
        {
            task.abort();
        }
        Ok(())
    }
}

async fn sse_handler(State(state): State<Arc<ServerState>>) -> Response {
    if state.closing.load(Ordering::Acquire) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let (tx, rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
    {
        let mut slot = state.client_tx.lock().expect("client lock poisoned");
        if slot.is_some() {
            return (StatusCode::CONFLICT, "session already active").into_response();
        }
        *slot = Some(tx);
    }

    let endpoint = format!("{}?sessionId={}", state.message_path, state.session_id);
    tracing::debug!(endpoint = %endpoint, "client subscribed, announcing endpoint");

    let first = tokio_stream::once(Ok::<_, Infallible>(
        Event::default().event("endpoint").data(endpoint),
    ));
    let rest =
        ReceiverStream::new(rx).map(|encoded| Ok(Event::default().event("message").data(encoded)));

    Sse::new(first.chain(rest))
        .keep_alive(KeepAlive::default())
        .into_response()
}

async fn message_handler(
    State(state): State<Arc<ServerState>>,
    Query(params): Query<HashMap<String, String>>,
    body: String,
) -> Response {
    if state.closing.load(Ordering::Acquire) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    if params.get("sessionId") != Some(&state.session_id) {
        return (StatusCode::NOT_FOUND, "unknown session").into_response();
    }
    let Some(handler) = state
        .handler
        .read()
        .expect("handler lock poisoned")
        .clone()
    else {
        return (StatusCode::CONFLICT, "transport not connected").into_response();
    };

    let message = match state.codec.decode(&body) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(error = %e, "rejecting unparseable POST body");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    // Dispatch off the HTTP path; any handler response flows back over SSE.
    let state = state.clone();
    tokio::spawn(async move {
        if let Some(response) = handler(message).await {
            match state.codec.encode(&response) {
                Ok(encoded) => {
                    if let Err(e) = state.queue_for_client(encoded) {
                        tracing::debug!(error = %e, "failed to queue response");
                    }
                }
                Err(e) => tracing::error!(error = %e, "failed to encode response"),
            }
        }
    });

    StatusCode::ACCEPTED.into_response()
}
