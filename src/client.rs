//! MCP client role
//!
//! [`McpClient`] is a thin façade over a [`Session`]: typed operations for
//! every server method, the client side of the initialize handshake, and
//! inbound handlers for server-originated traffic (`roots/list`,
//! `sampling/createMessage`) plus change/logging notifications.
//!
//! # Example
//!
//! ```rust,ignore
//! let client = McpClient::builder()
//!     .client_info("my-client", "1.0.0")
//!     .root(Root::new("file:///workspace"))
//!     .connect(transport)
//!     .await?;
//!
//! let server = client.initialize().await?;
//! let tools = client.list_tools(None).await?;
//! ```

use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

use serde_json::Value;

use crate::codec::JsonCodec;
use crate::error::{Error, JsonRpcError, Result};
use crate::protocol::{
    CallToolParams, CallToolResult, ClientCapabilities, CompleteArgument, CompleteParams,
    CompleteReference, CompleteResult, CreateMessageParams, CreateMessageResult, EmptyResult,
    GetPromptParams, GetPromptResult, Implementation, InitializeParams, InitializeResult,
    LATEST_PROTOCOL_VERSION, ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult,
    ListRootsResult, ListToolsResult, LoggingLevel, LoggingMessageParams, PaginatedParams, Prompt,
    ProgressParams, ReadResourceParams, ReadResourceResult, Resource, Root, ServerCapabilities,
    SetLevelParams, SUPPORTED_PROTOCOL_VERSIONS, SubscribeParams, Tool, UnsubscribeParams,
    methods, notifications,
};
use crate::session::{Peer, Session, SessionBuilder};
use crate::transport::{BoxFuture, Transport};

type SamplingHandler =
    Arc<dyn Fn(CreateMessageParams) -> BoxFuture<'static, Result<CreateMessageResult>> + Send + Sync>;
type ToolsChangeConsumer = Arc<dyn Fn(Vec<Tool>) -> BoxFuture<'static, Result<()>> + Send + Sync>;
type ResourcesChangeConsumer =
    Arc<dyn Fn(Vec<Resource>) -> BoxFuture<'static, Result<()>> + Send + Sync>;
type PromptsChangeConsumer =
    Arc<dyn Fn(Vec<Prompt>) -> BoxFuture<'static, Result<()>> + Send + Sync>;
type LoggingConsumer =
    Arc<dyn Fn(LoggingMessageParams) -> BoxFuture<'static, Result<()>> + Send + Sync>;
type ProgressConsumer = Arc<dyn Fn(ProgressParams) -> BoxFuture<'static, Result<()>> + Send + Sync>;

struct ClientState {
    info: Implementation,
    capabilities: ClientCapabilities,
    codec: JsonCodec,
    roots: RwLock<Vec<Root>>,
    session: OnceLock<Session>,
}

impl ClientState {
    fn session(&self) -> Result<Session> {
        self.session
            .get()
            .cloned()
            .ok_or_else(|| Error::Internal("session not wired".to_string()))
    }
}

/// Builder configuring a client's identity, capabilities, and inbound
/// handlers before the transport connects.
pub struct McpClientBuilder {
    info: Implementation,
    capabilities: Option<ClientCapabilities>,
    codec: JsonCodec,
    request_timeout: Option<Duration>,
    roots: Vec<Root>,
    sampling_handler: Option<SamplingHandler>,
    tools_change_consumers: Vec<ToolsChangeConsumer>,
    resources_change_consumers: Vec<ResourcesChangeConsumer>,
    prompts_change_consumers: Vec<PromptsChangeConsumer>,
    logging_consumers: Vec<LoggingConsumer>,
    progress_consumers: Vec<ProgressConsumer>,
}

impl Default for McpClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl McpClientBuilder {
    pub fn new() -> Self {
        Self {
            info: Implementation::new("duplex-mcp-client", env!("CARGO_PKG_VERSION")),
            capabilities: None,
            codec: JsonCodec::new(),
            request_timeout: None,
            roots: Vec::new(),
            sampling_handler: None,
            tools_change_consumers: Vec::new(),
            resources_change_consumers: Vec::new(),
            prompts_change_consumers: Vec::new(),
            logging_consumers: Vec::new(),
            progress_consumers: Vec::new(),
        }
    }

    pub fn client_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.info = Implementation::new(name, version);
        self
    }

    /// Declare capabilities explicitly. When not set, they are derived from
    /// the configured features: roots from [`root`](Self::root), sampling
    /// from [`sampling_handler`](Self::sampling_handler).
    pub fn capabilities(mut self, capabilities: ClientCapabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn codec(mut self, codec: JsonCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Deadline applied to every request.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Expose a filesystem root to the server.
    pub fn root(mut self, root: Root) -> Self {
        self.roots.push(root);
        self
    }

    /// Handle `sampling/createMessage` requests from the server. Implies
    /// the `sampling` capability unless capabilities were set explicitly.
    pub fn sampling_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(CreateMessageParams) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<CreateMessageResult>> + Send + 'static,
    {
        self.sampling_handler = Some(Arc::new(move |params| Box::pin(handler(params))));
        self
    }

    /// Run whenever the server announces a changed tool list; receives the
    /// freshly fetched list.
    pub fn tools_change_consumer<F, Fut>(mut self, consumer: F) -> Self
    where
        F: Fn(Vec<Tool>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.tools_change_consumers
            .push(Arc::new(move |tools| Box::pin(consumer(tools))));
        self
    }

    pub fn resources_change_consumer<F, Fut>(mut self, consumer: F) -> Self
    where
        F: Fn(Vec<Resource>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.resources_change_consumers
            .push(Arc::new(move |resources| Box::pin(consumer(resources))));
        self
    }

    pub fn prompts_change_consumer<F, Fut>(mut self, consumer: F) -> Self
    where
        F: Fn(Vec<Prompt>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.prompts_change_consumers
            .push(Arc::new(move |prompts| Box::pin(consumer(prompts))));
        self
    }

    /// Receive `notifications/message` log entries from the server.
    pub fn logging_consumer<F, Fut>(mut self, consumer: F) -> Self
    where
        F: Fn(LoggingMessageParams) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.logging_consumers
            .push(Arc::new(move |params| Box::pin(consumer(params))));
        self
    }

    /// Receive `notifications/progress` updates.
    pub fn progress_consumer<F, Fut>(mut self, consumer: F) -> Self
    where
        F: Fn(ProgressParams) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.progress_consumers
            .push(Arc::new(move |params| Box::pin(consumer(params))));
        self
    }

    fn derived_capabilities(&self) -> ClientCapabilities {
        let mut builder = ClientCapabilities::builder();
        if !self.roots.is_empty() {
            builder = builder.roots(true);
        }
        if self.sampling_handler.is_some() {
            builder = builder.sampling();
        }
        builder.build()
    }

    /// Build the session over `transport`, register the inbound handlers
    /// the configured capabilities call for, and start it. Call
    /// [`McpClient::initialize`] next to complete the handshake.
    pub async fn connect(self, transport: impl Transport) -> Result<McpClient> {
        let capabilities = self
            .capabilities
            .clone()
            .unwrap_or_else(|| self.derived_capabilities());
        let codec = self.codec;

        let state = Arc::new(ClientState {
            info: self.info,
            capabilities: capabilities.clone(),
            codec,
            roots: RwLock::new(self.roots),
            session: OnceLock::new(),
        });

        let mut builder = SessionBuilder::new(transport).codec(codec);
        if let Some(timeout) = self.request_timeout {
            builder = builder.request_timeout(timeout);
        }

        // Server-originated requests, bound only for declared capabilities;
        // anything else draws the authoritative MethodNotFound.
        if capabilities.roots.is_some() {
            builder = builder.request_handler(methods::ROOTS_LIST, {
                let state = state.clone();
                move |_params| {
                    let state = state.clone();
                    async move {
                        let roots = state.roots.read().expect("roots lock poisoned").clone();
                        state.codec.to_value(&ListRootsResult { roots })
                    }
                }
            });
        }
        if capabilities.sampling.is_some() {
            if let Some(handler) = self.sampling_handler.clone() {
                builder = builder.request_handler(methods::SAMPLING_CREATE_MESSAGE, {
                    let state = state.clone();
                    move |params| {
                        let state = state.clone();
                        let handler = handler.clone();
                        async move {
                            let params = params.ok_or_else(|| {
                                Error::JsonRpc(JsonRpcError::invalid_params("missing params"))
                            })?;
                            let params: CreateMessageParams =
                                state.codec.from_value(params).map_err(|e| {
                                    Error::JsonRpc(JsonRpcError::invalid_params(e.to_string()))
                                })?;
                            let result = handler(params).await?;
                            state.codec.to_value(&result)
                        }
                    }
                });
            }
        }
        builder = builder.request_handler(methods::PING, {
            let state = state.clone();
            move |_params| {
                let state = state.clone();
                async move { state.codec.to_value(&EmptyResult {}) }
            }
        });

        // Change notifications: refresh the list, then fan out.
        if !self.tools_change_consumers.is_empty() {
            let consumers = self.tools_change_consumers.clone();
            builder = builder.notification_handler(notifications::TOOLS_LIST_CHANGED, {
                let state = state.clone();
                move |_params| {
                    let state = state.clone();
                    let consumers = consumers.clone();
                    async move {
                        let session = state.session()?;
                        let result = session.request(methods::TOOLS_LIST, None).await?;
                        let listed: ListToolsResult = state.codec.from_value(result)?;
                        for consumer in &consumers {
                            if let Err(e) = consumer(listed.tools.clone()).await {
                                tracing::warn!(error = %e, "tools change consumer failed");
                            }
                        }
                        Ok(())
                    }
                }
            });
        }
        if !self.resources_change_consumers.is_empty() {
            let consumers = self.resources_change_consumers.clone();
            builder = builder.notification_handler(notifications::RESOURCES_LIST_CHANGED, {
                let state = state.clone();
                move |_params| {
                    let state = state.clone();
                    let consumers = consumers.clone();
                    async move {
                        let session = state.session()?;
                        let result = session.request(methods::RESOURCES_LIST, None).await?;
                        let listed: ListResourcesResult = state.codec.from_value(result)?;
                        for consumer in &consumers {
                            if let Err(e) = consumer(listed.resources.clone()).await {
                                tracing::warn!(error = %e, "resources change consumer failed");
                            }
                        }
                        Ok(())
                    }
                }
            });
        }
        if !self.prompts_change_consumers.is_empty() {
            let consumers = self.prompts_change_consumers.clone();
            builder = builder.notification_handler(notifications::PROMPTS_LIST_CHANGED, {
                let state = state.clone();
                move |_params| {
                    let state = state.clone();
                    let consumers = consumers.clone();
                    async move {
                        let session = state.session()?;
                        let result = session.request(methods::PROMPTS_LIST, None).await?;
                        let listed: ListPromptsResult = state.codec.from_value(result)?;
                        for consumer in &consumers {
                            if let Err(e) = consumer(listed.prompts.clone()).await {
                                tracing::warn!(error = %e, "prompts change consumer failed");
                            }
                        }
                        Ok(())
                    }
                }
            });
        }
        if !self.logging_consumers.is_empty() {
            let consumers = self.logging_consumers.clone();
            builder = builder.notification_handler(notifications::MESSAGE, {
                let state = state.clone();
                move |params| {
                    let state = state.clone();
                    let consumers = consumers.clone();
                    async move {
                        let Some(params) = params else {
                            return Ok(());
                        };
                        let params: LoggingMessageParams = state.codec.from_value(params)?;
                        for consumer in &consumers {
                            if let Err(e) = consumer(params.clone()).await {
                                tracing::warn!(error = %e, "logging consumer failed");
                            }
                        }
                        Ok(())
                    }
                }
            });
        }
        if !self.progress_consumers.is_empty() {
            let consumers = self.progress_consumers.clone();
            builder = builder.notification_handler(notifications::PROGRESS, {
                let state = state.clone();
                move |params| {
                    let state = state.clone();
                    let consumers = consumers.clone();
                    async move {
                        let Some(params) = params else {
                            return Ok(());
                        };
                        let params: ProgressParams = state.codec.from_value(params)?;
                        for consumer in &consumers {
                            if let Err(e) = consumer(params.clone()).await {
                                tracing::warn!(error = %e, "progress consumer failed");
                            }
                        }
                        Ok(())
                    }
                }
            });
        }
        builder = builder.notification_handler(notifications::CANCELLED, |params| async move {
            tracing::debug!(params = ?params, "peer cancelled an inbound request");
            Ok(())
        });

        let session = builder.build();
        state
            .session
            .set(session.clone())
            .map_err(|_| Error::Internal("session wired twice".to_string()))?;
        session.start().await?;

        Ok(McpClient { session, state })
    }
}

/// Handle to a connected MCP client session. Cloning is cheap.
#[derive(Clone)]
pub struct McpClient {
    session: Session,
    state: Arc<ClientState>,
}

impl McpClient {
    pub fn builder() -> McpClientBuilder {
        McpClientBuilder::new()
    }

    /// The underlying session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Whether the initialize handshake has completed.
    pub fn is_initialized(&self) -> bool {
        self.session.is_ready()
    }

    /// The server's identity and capabilities, once initialized.
    pub fn server_capabilities(&self) -> Option<ServerCapabilities> {
        match self.session.peer() {
            Some(Peer::Server { capabilities, .. }) => Some(capabilities),
            _ => None,
        }
    }

    pub fn server_info(&self) -> Option<Implementation> {
        self.session.peer().map(|peer| peer.info().clone())
    }

    /// Drive the client side of the handshake: send `initialize`, record
    /// the server's capabilities, emit `notifications/initialized`, and
    /// mark the session Ready. Failure closes the transport.
    pub async fn initialize(&self) -> Result<InitializeResult> {
        if self.session.is_ready() {
            return Err(Error::Mcp("already initialized".to_string()));
        }

        let params = InitializeParams {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: self.state.capabilities.clone(),
            client_info: self.state.info.clone(),
        };

        let result = match self
            .session
            .request(methods::INITIALIZE, Some(self.state.codec.to_value(&params)?))
            .await
        {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "initialize failed, closing session");
                let _ = self.session.close().await;
                return Err(e);
            }
        };

        let init: InitializeResult = self.state.codec.from_value(result)?;
        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&init.protocol_version.as_str()) {
            let _ = self.session.close().await;
            return Err(Error::Mcp(format!(
                "unsupported protocol version: {}",
                init.protocol_version
            )));
        }

        tracing::info!(
            server = %init.server_info.name,
            version = %init.server_info.version,
            "connected to server"
        );
        self.session.set_peer(Peer::Server {
            info: init.server_info.clone(),
            capabilities: init.capabilities.clone(),
        });
        self.session.mark_handshake_responded();

        self.session
            .notify(notifications::INITIALIZED, None)
            .await?;
        self.session.mark_ready();

        Ok(init)
    }

    pub async fn ping(&self) -> Result<()> {
        let _: EmptyResult = self.request(methods::PING, &EmptyResult {}).await?;
        Ok(())
    }

    pub async fn list_tools(&self, cursor: Option<String>) -> Result<ListToolsResult> {
        self.ensure_initialized()?;
        self.request(methods::TOOLS_LIST, &PaginatedParams { cursor })
            .await
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        self.ensure_initialized()?;
        self.request(
            methods::TOOLS_CALL,
            &CallToolParams {
                name: name.to_string(),
                arguments: Some(arguments),
            },
        )
        .await
    }

    pub async fn list_resources(&self, cursor: Option<String>) -> Result<ListResourcesResult> {
        self.ensure_initialized()?;
        self.request(methods::RESOURCES_LIST, &PaginatedParams { cursor })
            .await
    }

    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        self.ensure_initialized()?;
        self.request(
            methods::RESOURCES_READ,
            &ReadResourceParams {
                uri: uri.to_string(),
            },
        )
        .await
    }

    pub async fn list_resource_templates(
        &self,
        cursor: Option<String>,
    ) -> Result<ListResourceTemplatesResult> {
        self.ensure_initialized()?;
        self.request(methods::RESOURCES_TEMPLATES_LIST, &PaginatedParams { cursor })
            .await
    }

    /// Subscribe to change notifications for a resource. Whether the server
    /// supports subscriptions is its call; an undeclared capability comes
    /// back as `MethodNotFound`.
    pub async fn subscribe(&self, uri: &str) -> Result<()> {
        self.ensure_initialized()?;
        let _: EmptyResult = self
            .request(
                methods::RESOURCES_SUBSCRIBE,
                &SubscribeParams {
                    uri: uri.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    pub async fn unsubscribe(&self, uri: &str) -> Result<()> {
        self.ensure_initialized()?;
        let _: EmptyResult = self
            .request(
                methods::RESOURCES_UNSUBSCRIBE,
                &UnsubscribeParams {
                    uri: uri.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    pub async fn list_prompts(&self, cursor: Option<String>) -> Result<ListPromptsResult> {
        self.ensure_initialized()?;
        self.request(methods::PROMPTS_LIST, &PaginatedParams { cursor })
            .await
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<std::collections::HashMap<String, String>>,
    ) -> Result<GetPromptResult> {
        self.ensure_initialized()?;
        self.request(
            methods::PROMPTS_GET,
            &GetPromptParams {
                name: name.to_string(),
                arguments,
            },
        )
        .await
    }

    /// Set the minimum severity for `notifications/message` entries.
    pub async fn set_logging_level(&self, level: LoggingLevel) -> Result<()> {
        self.ensure_initialized()?;
        let _: EmptyResult = self
            .request(methods::LOGGING_SET_LEVEL, &SetLevelParams { level })
            .await?;
        Ok(())
    }

    /// Ask the server for argument completions.
    pub async fn complete(
        &self,
        reference: CompleteReference,
        argument_name: &str,
        argument_value: &str,
    ) -> Result<CompleteResult> {
        self.ensure_initialized()?;
        self.request(
            methods::COMPLETION_COMPLETE,
            &CompleteParams {
                reference,
                argument: CompleteArgument {
                    name: argument_name.to_string(),
                    value: argument_value.to_string(),
                },
            },
        )
        .await
    }

    /// The roots currently exposed to the server.
    pub fn roots(&self) -> Vec<Root> {
        self.state.roots.read().expect("roots lock poisoned").clone()
    }

    /// Replace the root list; notifies the server when the `roots`
    /// capability declared `listChanged`.
    pub async fn set_roots(&self, roots: Vec<Root>) -> Result<()> {
        *self.state.roots.write().expect("roots lock poisoned") = roots;
        self.notify_roots_changed().await
    }

    pub async fn add_root(&self, root: Root) -> Result<()> {
        self.state
            .roots
            .write()
            .expect("roots lock poisoned")
            .push(root);
        self.notify_roots_changed().await
    }

    pub async fn remove_root(&self, uri: &str) -> Result<bool> {
        let removed = {
            let mut roots = self.state.roots.write().expect("roots lock poisoned");
            let before = roots.len();
            roots.retain(|root| root.uri != uri);
            roots.len() < before
        };
        if removed {
            self.notify_roots_changed().await?;
        }
        Ok(removed)
    }

    /// Close the session and its transport.
    pub async fn close(&self) -> Result<()> {
        self.session.close().await
    }

    async fn notify_roots_changed(&self) -> Result<()> {
        let declared = self
            .state
            .capabilities
            .roots
            .as_ref()
            .map(|caps| caps.list_changed)
            .unwrap_or(false);
        if !declared || !self.session.is_ready() {
            return Ok(());
        }
        self.session
            .notify(notifications::ROOTS_LIST_CHANGED, None)
            .await
    }

    async fn request<P: serde::Serialize, R: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: &P,
    ) -> Result<R> {
        let params = self.state.codec.to_value(params)?;
        let result = self.session.request(method, Some(params)).await?;
        self.state.codec.from_value(result)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if !self.session.is_ready() {
            return Err(Error::Mcp("client not initialized".to_string()));
        }
        Ok(())
    }
}
