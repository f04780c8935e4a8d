//! MCP session: request correlation, dispatch, and lifecycle
//!
//! A [`Session`] multiplexes concurrent requests over a single message
//! stream. Outbound requests allocate monotonically increasing ids and park
//! the caller in a pending table until the matching response, a deadline,
//! a cancellation, or session close resolves the slot. Inbound requests and
//! notifications are dispatched to handlers bound at construction time;
//! dispatch always runs off the transport's read path.
//!
//! The session progresses through phases:
//! `Created -> Initializing -> Ready -> Closing -> Closed`. Both roles drive
//! the same state machine; only the registered handlers differ.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::codec::{JsonCodec, Message, Notification, Request, Response};
use crate::error::{Error, JsonRpcError, Result};
use crate::protocol::{
    CancelledParams, ClientCapabilities, Implementation, RequestId, ServerCapabilities, methods,
    notifications,
};
use crate::transport::{BoxFuture, InboundHandler, Transport};

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionPhase {
    /// Built but not started
    Created = 0,
    /// Transport connected, handshake in flight
    Initializing = 1,
    /// Handshake complete, normal operation
    Ready = 2,
    /// Close requested, pending slots being drained
    Closing = 3,
    /// Fully shut down
    Closed = 4,
}

impl From<u8> for SessionPhase {
    fn from(value: u8) -> Self {
        match value {
            0 => SessionPhase::Created,
            1 => SessionPhase::Initializing,
            2 => SessionPhase::Ready,
            3 => SessionPhase::Closing,
            _ => SessionPhase::Closed,
        }
    }
}

/// Capabilities and identity of the connected peer, recorded during the
/// initialize handshake.
#[derive(Debug, Clone)]
pub enum Peer {
    /// The peer is an MCP client
    Client {
        info: Implementation,
        capabilities: ClientCapabilities,
    },
    /// The peer is an MCP server
    Server {
        info: Implementation,
        capabilities: ServerCapabilities,
    },
}

impl Peer {
    pub fn info(&self) -> &Implementation {
        match self {
            Peer::Client { info, .. } | Peer::Server { info, .. } => info,
        }
    }
}

/// Handler for one inbound request method.
///
/// Receives the request params and produces the result value or an error;
/// errors travel back as JSON-RPC error responses.
pub type RequestHandler =
    Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Handler for one inbound notification method. Errors are logged and
/// discarded; notifications never produce a response.
pub type NotificationHandler =
    Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

type PendingSender = oneshot::Sender<Result<Value>>;

struct SessionInner {
    transport: Arc<dyn Transport>,
    codec: JsonCodec,
    phase: AtomicU8,
    /// Set once the local side has answered (or received the answer to)
    /// `initialize`; requests other than initialize/ping pass the dispatch
    /// gate from that point, even while the `notifications/initialized`
    /// handler is still in flight on its own task.
    handshake_responded: AtomicBool,
    next_id: AtomicI64,
    pending: Mutex<HashMap<RequestId, PendingSender>>,
    request_handlers: HashMap<String, RequestHandler>,
    notification_handlers: HashMap<String, Vec<NotificationHandler>>,
    default_timeout: Option<Duration>,
    peer: RwLock<Option<Peer>>,
}

/// Builder binding handlers before the session runs.
///
/// Handler tables are frozen at [`build`](SessionBuilder::build); the
/// running session never mutates them.
pub struct SessionBuilder {
    transport: Arc<dyn Transport>,
    codec: JsonCodec,
    request_handlers: HashMap<String, RequestHandler>,
    notification_handlers: HashMap<String, Vec<NotificationHandler>>,
    default_timeout: Option<Duration>,
}

impl SessionBuilder {
    pub fn new(transport: impl Transport) -> Self {
        Self::from_arc(Arc::new(transport))
    }

    pub fn from_arc(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            codec: JsonCodec::new(),
            request_handlers: HashMap::new(),
            notification_handlers: HashMap::new(),
            default_timeout: None,
        }
    }

    pub fn codec(mut self, codec: JsonCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Deadline applied to every `request` that does not carry its own.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Bind the handler for an inbound request method. The last binding for
    /// a method wins.
    pub fn request_handler<F, Fut>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
    {
        self.request_handlers.insert(
            method.into(),
            Arc::new(move |params| Box::pin(handler(params))),
        );
        self
    }

    /// Append a handler for an inbound notification method. Handlers for
    /// the same method all run, concurrently, in wire order of arrival.
    pub fn notification_handler<F, Fut>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.notification_handlers
            .entry(method.into())
            .or_default()
            .push(Arc::new(move |params| Box::pin(handler(params))));
        self
    }

    pub fn build(self) -> Session {
        Session {
            inner: Arc::new(SessionInner {
                transport: self.transport,
                codec: self.codec,
                phase: AtomicU8::new(SessionPhase::Created as u8),
                handshake_responded: AtomicBool::new(false),
                next_id: AtomicI64::new(1),
                pending: Mutex::new(HashMap::new()),
                request_handlers: self.request_handlers,
                notification_handlers: self.notification_handlers,
                default_timeout: self.default_timeout,
                peer: RwLock::new(None),
            }),
        }
    }
}

/// A running (or startable) MCP session. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn builder(transport: impl Transport) -> SessionBuilder {
        SessionBuilder::new(transport)
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> SessionPhase {
        SessionPhase::from(self.inner.phase.load(Ordering::Acquire))
    }

    pub fn is_ready(&self) -> bool {
        self.phase() == SessionPhase::Ready
    }

    /// The codec this session was constructed with
    pub fn codec(&self) -> JsonCodec {
        self.inner.codec
    }

    /// The peer's identity and capabilities, once initialize completed
    pub fn peer(&self) -> Option<Peer> {
        self.inner.peer.read().expect("peer lock poisoned").clone()
    }

    pub(crate) fn set_peer(&self, peer: Peer) {
        *self.inner.peer.write().expect("peer lock poisoned") = Some(peer);
    }

    /// Record that the initialize exchange completed on this side, opening
    /// the dispatch gate ahead of the Ready transition.
    pub(crate) fn mark_handshake_responded(&self) {
        self.inner
            .handshake_responded
            .store(true, Ordering::Release);
    }

    /// Transition `Initializing -> Ready` after a completed handshake.
    pub(crate) fn mark_ready(&self) -> bool {
        self.inner
            .phase
            .compare_exchange(
                SessionPhase::Initializing as u8,
                SessionPhase::Ready as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Connect the transport using the session's own inbound dispatch.
    ///
    /// Transitions `Created -> Initializing`; the role façade drives the
    /// rest of the handshake.
    pub async fn start(&self) -> Result<()> {
        self.inner
            .phase
            .compare_exchange(
                SessionPhase::Created as u8,
                SessionPhase::Initializing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| Error::Internal("session already started".to_string()))?;

        // The transport holds this handler for the session's lifetime; a
        // weak reference keeps session teardown from leaking through the
        // cycle transport -> handler -> session -> transport.
        let weak = Arc::downgrade(&self.inner);
        let handler: InboundHandler = Arc::new(move |message: Message| {
            let weak = weak.clone();
            Box::pin(async move {
                match weak.upgrade() {
                    Some(inner) => dispatch(inner, message).await,
                    None => None,
                }
            })
        });

        self.inner.transport.connect(handler).await
    }

    /// Send a request and await its response.
    ///
    /// Applies the builder's default deadline, if any. See
    /// [`request_with_timeout`](Session::request_with_timeout).
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.request_with_timeout(method, params, self.inner.default_timeout)
            .await
    }

    /// Send a request with an explicit deadline.
    ///
    /// On expiry the pending slot is removed, a `notifications/cancelled`
    /// is emitted for the id, and the caller fails with [`Error::Timeout`].
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        match self.phase() {
            SessionPhase::Closing | SessionPhase::Closed => return Err(Error::SessionClosed),
            _ => {}
        }

        let id = RequestId::Number(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock().expect("pending lock poisoned");
            if pending.insert(id.clone(), tx).is_some() {
                // Ids are never reused within a session; reaching this
                // branch would mean the allocator wrapped.
                return Err(Error::Internal(format!("request id {} already in flight", id)));
            }
        }

        let mut request = Request::new(id.clone(), method);
        request.params = params;

        tracing::debug!(method = %method, id = %id, "sending request");
        if let Err(e) = self.inner.transport.send(Message::Request(request)).await {
            self.take_pending(&id);
            if matches!(e, Error::Transport(_) | Error::TransportClosed) {
                self.close_on_transport_error();
            }
            return Err(e);
        }

        let outcome = match timeout {
            Some(deadline) => match tokio::time::timeout(deadline, rx).await {
                Ok(received) => received,
                Err(_) => {
                    if self.take_pending(&id).is_some() {
                        tracing::debug!(id = %id, "request deadline elapsed, cancelling");
                        self.send_cancelled(&id, "request timed out").await;
                    }
                    return Err(Error::Timeout);
                }
            },
            None => rx.await,
        };

        match outcome {
            Ok(result) => result,
            // The sender was dropped without a verdict; only teardown does
            // that.
            Err(_) => Err(Error::SessionClosed),
        }
    }

    /// Fire-and-forget notification; completes when the transport flush
    /// completes.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        match self.phase() {
            SessionPhase::Closing | SessionPhase::Closed => return Err(Error::SessionClosed),
            _ => {}
        }
        let mut notification = Notification::new(method);
        notification.params = params;
        tracing::debug!(method = %method, "sending notification");
        self.inner
            .transport
            .send(Message::Notification(notification))
            .await
    }

    /// Cancel one pending request: the caller fails with
    /// [`Error::Cancelled`] and a single `notifications/cancelled` is
    /// broadcast. A later response for the id is logged and dropped.
    pub async fn cancel(&self, id: &RequestId, reason: &str) {
        if let Some(tx) = self.take_pending(id) {
            let _ = tx.send(Err(Error::Cancelled));
            self.send_cancelled(id, reason).await;
        }
    }

    /// Transition to `Closing`, fail every pending request with
    /// [`Error::SessionClosed`], close the transport, transition to
    /// `Closed`. Idempotent.
    pub async fn close(&self) -> Result<()> {
        let phase = self.inner.phase.load(Ordering::Acquire);
        if phase >= SessionPhase::Closing as u8 {
            return Ok(());
        }
        self.inner
            .phase
            .store(SessionPhase::Closing as u8, Ordering::Release);

        let drained: Vec<(RequestId, PendingSender)> = {
            let mut pending = self.inner.pending.lock().expect("pending lock poisoned");
            pending.drain().collect()
        };
        for (id, tx) in drained {
            tracing::debug!(id = %id, "failing pending request on close");
            let _ = tx.send(Err(Error::SessionClosed));
        }

        let result = self.inner.transport.close().await;
        self.inner
            .phase
            .store(SessionPhase::Closed as u8, Ordering::Release);
        result
    }

    fn take_pending(&self, id: &RequestId) -> Option<PendingSender> {
        self.inner
            .pending
            .lock()
            .expect("pending lock poisoned")
            .remove(id)
    }

    async fn send_cancelled(&self, id: &RequestId, reason: &str) {
        let params = CancelledParams {
            request_id: id.clone(),
            reason: Some(reason.to_string()),
        };
        let params = match self.inner.codec.to_value(&params) {
            Ok(params) => params,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode cancellation");
                return;
            }
        };
        let notification =
            Notification::new(notifications::CANCELLED).with_params(params);
        if let Err(e) = self
            .inner
            .transport
            .send(Message::Notification(notification))
            .await
        {
            tracing::debug!(error = %e, "failed to send cancellation");
        }
    }

    fn close_on_transport_error(&self) {
        let session = self.clone();
        tokio::spawn(async move {
            tracing::warn!("transport failure, closing session");
            let _ = session.close().await;
        });
    }
}

/// Per-envelope dispatch. Runs on a task spawned by the transport, never on
/// its read path; the returned envelope (if any) is the response the
/// transport writes back.
async fn dispatch(inner: Arc<SessionInner>, message: Message) -> Option<Message> {
    match message {
        Message::Response(response) => {
            let slot = inner
                .pending
                .lock()
                .expect("pending lock poisoned")
                .remove(&response.id);
            match slot {
                Some(tx) => {
                    let id = response.id.clone();
                    let outcome = response.into_result().map_err(Error::JsonRpc);
                    if tx.send(outcome).is_err() {
                        tracing::debug!(id = %id, "response arrived after caller went away");
                    }
                }
                None => {
                    tracing::debug!(id = %response.id, "dropping late or unknown response");
                }
            }
            None
        }
        Message::Request(request) => {
            let phase = SessionPhase::from(inner.phase.load(Ordering::Acquire));
            match phase {
                SessionPhase::Closing | SessionPhase::Closed => return None,
                SessionPhase::Created | SessionPhase::Initializing => {
                    let allowed = request.method == methods::INITIALIZE
                        || request.method == methods::PING
                        || inner.handshake_responded.load(Ordering::Acquire);
                    if !allowed {
                        tracing::warn!(method = %request.method, "request before initialization");
                        return Some(Message::Response(Response::error(
                            request.id,
                            JsonRpcError::invalid_request("session not initialized"),
                        )));
                    }
                }
                SessionPhase::Ready => {}
            }

            let Some(handler) = inner.request_handlers.get(&request.method) else {
                tracing::debug!(method = %request.method, "no handler for method");
                return Some(Message::Response(Response::error(
                    request.id,
                    JsonRpcError::method_not_found(&request.method),
                )));
            };

            tracing::debug!(method = %request.method, id = %request.id, "dispatching request");
            let response = match handler(request.params).await {
                Ok(result) => Response::result(request.id, result),
                Err(e) => {
                    tracing::debug!(method = %request.method, error = %e, "handler failed");
                    Response::error(request.id, e.to_wire())
                }
            };
            Some(Message::Response(response))
        }
        Message::Notification(notification) => {
            let Some(handlers) = inner.notification_handlers.get(&notification.method) else {
                tracing::debug!(method = %notification.method, "unhandled notification");
                return None;
            };
            tracing::debug!(
                method = %notification.method,
                handlers = handlers.len(),
                "dispatching notification"
            );

            let method = notification.method.clone();
            let invocations = handlers
                .iter()
                .map(|handler| handler(notification.params.clone()));
            for outcome in futures::future::join_all(invocations).await {
                if let Err(e) = outcome {
                    tracing::warn!(method = %method, error = %e, "notification handler failed");
                }
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    /// Transport that records outbound messages and lets the test inject
    /// inbound ones through the connected handler.
    struct TestTransport {
        handler: Mutex<Option<InboundHandler>>,
        sent_tx: mpsc::UnboundedSender<Message>,
        closed: std::sync::atomic::AtomicBool,
    }

    impl TestTransport {
        fn pair() -> (Arc<Self>, mpsc::UnboundedReceiver<Message>) {
            let (sent_tx, sent_rx) = mpsc::unbounded_channel();
            (
                Arc::new(Self {
                    handler: Mutex::new(None),
                    sent_tx,
                    closed: std::sync::atomic::AtomicBool::new(false),
                }),
                sent_rx,
            )
        }

        /// Inject an inbound message as the transport read loop would.
        async fn inject(&self, message: Message) -> Option<Message> {
            let handler = self
                .handler
                .lock()
                .unwrap()
                .clone()
                .expect("not connected");
            handler(message).await
        }
    }

    #[async_trait::async_trait]
    impl Transport for Arc<TestTransport> {
        async fn connect(&self, handler: InboundHandler) -> Result<()> {
            *self.handler.lock().unwrap() = Some(handler);
            Ok(())
        }

        async fn send(&self, message: Message) -> Result<()> {
            if self.closed.load(Ordering::Acquire) {
                return Err(Error::TransportClosed);
            }
            self.sent_tx
                .send(message)
                .map_err(|_| Error::Transport("receiver gone".into()))
        }

        async fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::Release);
            Ok(())
        }
    }

    fn ready_session(transport: Arc<TestTransport>) -> Session {
        let session = SessionBuilder::new(transport).build();
        session
    }

    async fn start_ready(session: &Session) {
        session.start().await.unwrap();
        assert!(session.mark_ready());
    }

    #[tokio::test]
    async fn request_resolves_on_matching_response() {
        let (transport, mut sent) = TestTransport::pair();
        let session = ready_session(transport.clone());
        start_ready(&session).await;

        let pending = {
            let session = session.clone();
            tokio::spawn(async move { session.request("tools/list", None).await })
        };

        let outbound = sent.recv().await.unwrap();
        let Message::Request(request) = outbound else {
            panic!("expected request");
        };
        assert_eq!(request.method, "tools/list");

        transport
            .inject(Message::Response(Response::result(
                request.id,
                serde_json::json!({"tools": []}),
            )))
            .await;

        let result = pending.await.unwrap().unwrap();
        assert_eq!(result["tools"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn request_ids_increase_monotonically() {
        let (transport, mut sent) = TestTransport::pair();
        let session = ready_session(transport.clone());
        start_ready(&session).await;

        for _ in 0..3 {
            let session = session.clone();
            tokio::spawn(async move {
                let _ = session.request("ping", None).await;
            });
        }

        let mut ids = Vec::new();
        for _ in 0..3 {
            let Message::Request(request) = sent.recv().await.unwrap() else {
                panic!("expected request");
            };
            let RequestId::Number(n) = request.id else {
                panic!("expected numeric id");
            };
            ids.push(n);
        }
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 3, "ids must never repeat");
    }

    #[tokio::test]
    async fn close_fails_pending_with_session_closed() {
        let (transport, mut sent) = TestTransport::pair();
        let session = ready_session(transport.clone());
        start_ready(&session).await;

        let pending = {
            let session = session.clone();
            tokio::spawn(async move { session.request("tools/list", None).await })
        };
        // Wait for the request to reach the wire before closing.
        sent.recv().await.unwrap();

        session.close().await.unwrap();
        assert!(matches!(
            pending.await.unwrap().unwrap_err(),
            Error::SessionClosed
        ));
        assert_eq!(session.phase(), SessionPhase::Closed);

        // New requests are refused outright.
        assert!(matches!(
            session.request("ping", None).await.unwrap_err(),
            Error::SessionClosed
        ));
    }

    #[tokio::test]
    async fn timeout_cancels_and_drops_late_response() {
        let (transport, mut sent) = TestTransport::pair();
        let session = ready_session(transport.clone());
        start_ready(&session).await;

        let err = session
            .request_with_timeout("tools/call", None, Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout));

        let Message::Request(request) = sent.recv().await.unwrap() else {
            panic!("expected request");
        };

        // The wire shows exactly one cancellation for the id.
        let Message::Notification(cancelled) = sent.recv().await.unwrap() else {
            panic!("expected cancellation");
        };
        assert_eq!(cancelled.method, notifications::CANCELLED);
        let params = cancelled.params.unwrap();
        assert_eq!(params["requestId"], serde_json::json!(1));

        // A late response for the cancelled id is silently dropped.
        let reply = transport
            .inject(Message::Response(Response::result(
                request.id,
                serde_json::json!({}),
            )))
            .await;
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn explicit_cancel_fails_caller_with_cancelled() {
        let (transport, mut sent) = TestTransport::pair();
        let session = ready_session(transport.clone());
        start_ready(&session).await;

        let pending = {
            let session = session.clone();
            tokio::spawn(async move { session.request("tools/call", None).await })
        };
        let Message::Request(request) = sent.recv().await.unwrap() else {
            panic!("expected request");
        };

        session.cancel(&request.id, "user abort").await;
        assert!(matches!(
            pending.await.unwrap().unwrap_err(),
            Error::Cancelled
        ));
    }

    #[tokio::test]
    async fn inbound_request_without_handler_is_method_not_found() {
        let (transport, _sent) = TestTransport::pair();
        let session = ready_session(transport.clone());
        start_ready(&session).await;

        let reply = transport
            .inject(Message::Request(Request::new(9, "bogus")))
            .await
            .unwrap();
        let Message::Response(response) = reply else {
            panic!("expected response");
        };
        assert_eq!(response.id, RequestId::Number(9));
        assert_eq!(response.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn inbound_request_before_ready_is_invalid_request() {
        let (transport, _sent) = TestTransport::pair();
        let session = SessionBuilder::new(transport.clone())
            .request_handler("tools/list", |_| async {
                Ok(serde_json::json!({"tools": []}))
            })
            .build();
        session.start().await.unwrap();
        // Still Initializing: only initialize and ping pass the gate.

        let reply = transport
            .inject(Message::Request(Request::new(1, "tools/list")))
            .await
            .unwrap();
        let Message::Response(response) = reply else {
            panic!("expected response");
        };
        assert_eq!(response.error.unwrap().code, -32600);
    }

    #[tokio::test]
    async fn registered_handler_answers_request() {
        let (transport, _sent) = TestTransport::pair();
        let session = SessionBuilder::new(transport.clone())
            .request_handler("ping", |_| async { Ok(serde_json::json!({})) })
            .build();
        start_ready(&session).await;

        let reply = transport
            .inject(Message::Request(Request::new(2, "ping")))
            .await
            .unwrap();
        let Message::Response(response) = reply else {
            panic!("expected response");
        };
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn notifications_fan_out_to_every_handler() {
        let (transport, _sent) = TestTransport::pair();
        let calls = Arc::new(AtomicUsize::new(0));
        let (a, b) = (calls.clone(), calls.clone());
        let session = SessionBuilder::new(transport.clone())
            .notification_handler("notifications/tools/list_changed", move |_| {
                let calls = a.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .notification_handler("notifications/tools/list_changed", move |_| {
                let calls = b.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Error::Mcp("handler failure is logged, not fatal".into()))
                }
            })
            .build();
        start_ready(&session).await;

        let reply = transport
            .inject(Message::Notification(Notification::new(
                "notifications/tools/list_changed",
            )))
            .await;
        assert!(reply.is_none(), "notifications never produce a response");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn peer_error_response_surfaces_to_caller() {
        let (transport, mut sent) = TestTransport::pair();
        let session = ready_session(transport.clone());
        start_ready(&session).await;

        let pending = {
            let session = session.clone();
            tokio::spawn(async move { session.request("tools/call", None).await })
        };
        let Message::Request(request) = sent.recv().await.unwrap() else {
            panic!("expected request");
        };

        transport
            .inject(Message::Response(Response::error(
                request.id,
                JsonRpcError::invalid_params("missing name"),
            )))
            .await;

        match pending.await.unwrap().unwrap_err() {
            Error::JsonRpc(e) => assert_eq!(e.code, -32602),
            other => panic!("expected wire error, got {:?}", other),
        }
    }
}
