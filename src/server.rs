//! MCP server role
//!
//! [`McpServer`] is a thin façade over a [`Session`]: it registers request
//! handlers for the MCP server methods, holds the tool/resource/prompt/
//! completion specifications, and publishes `*/list_changed` notifications
//! when a registry mutates (only if the matching capability was declared).
//!
//! # Example
//!
//! ```rust,ignore
//! let echo = ToolBuilder::new("echo")
//!     .description("Echo the input text")
//!     .handler(|_exchange, input: EchoInput| async move {
//!         Ok(CallToolResult::text(input.text))
//!     });
//!
//! let server = McpServer::builder()
//!     .server_info("my-server", "1.0.0")
//!     .tool(echo)
//!     .serve(transport)
//!     .await?;
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::Duration;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::codec::JsonCodec;
use crate::error::{Error, JsonRpcError, Result};
use crate::exchange::Exchange;
use crate::protocol::{
    CallToolParams, CallToolResult, CompleteParams, CompleteReference, CompleteResult, EmptyResult,
    GetPromptParams, GetPromptResult, Implementation, InitializeParams, InitializeResult,
    LATEST_PROTOCOL_VERSION, ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult,
    ListToolsResult, LoggingLevel, Prompt, ReadResourceParams, ReadResourceResult, Resource,
    ResourceContents, ResourceTemplate, Root, ServerCapabilities, SetLevelParams,
    SUPPORTED_PROTOCOL_VERSIONS, SubscribeParams, Tool, UnsubscribeParams, methods, notifications,
};
use crate::session::{Peer, Session, SessionBuilder};
use crate::transport::{BoxFuture, Transport};

type ToolHandlerFn =
    Arc<dyn Fn(Exchange, Option<Value>) -> BoxFuture<'static, Result<CallToolResult>> + Send + Sync>;
type ResourceHandlerFn = Arc<
    dyn Fn(Exchange, ReadResourceParams) -> BoxFuture<'static, Result<ReadResourceResult>>
        + Send
        + Sync,
>;
type PromptHandlerFn =
    Arc<dyn Fn(Exchange, GetPromptParams) -> BoxFuture<'static, Result<GetPromptResult>> + Send + Sync>;
type CompletionHandlerFn =
    Arc<dyn Fn(Exchange, CompleteParams) -> BoxFuture<'static, Result<CompleteResult>> + Send + Sync>;
type RootsChangeConsumer =
    Arc<dyn Fn(Exchange, Vec<Root>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

// =============================================================================
// Specifications
// =============================================================================

/// A tool descriptor paired with its call handler.
#[derive(Clone)]
pub struct ToolSpec {
    pub tool: Tool,
    call: ToolHandlerFn,
}

impl ToolSpec {
    pub fn new<F, Fut>(tool: Tool, call: F) -> Self
    where
        F: Fn(Exchange, Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<CallToolResult>> + Send + 'static,
    {
        Self {
            tool,
            call: Arc::new(move |exchange, args| Box::pin(call(exchange, args))),
        }
    }
}

/// Builder for tools with schema derived from the input type.
pub struct ToolBuilder {
    name: String,
    description: Option<String>,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Finish with a typed handler; the input schema comes from `schemars`.
    pub fn handler<I, F, Fut>(self, handler: F) -> ToolSpec
    where
        I: JsonSchema + DeserializeOwned + Send + 'static,
        F: Fn(Exchange, I) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<CallToolResult>> + Send + 'static,
    {
        let schema = serde_json::to_value(schemars::schema_for!(I))
            .unwrap_or_else(|_| serde_json::json!({"type": "object"}));
        let handler = Arc::new(handler);
        ToolSpec {
            tool: Tool {
                name: self.name,
                description: self.description,
                input_schema: schema,
            },
            call: Arc::new(move |exchange, args| {
                let handler = handler.clone();
                Box::pin(async move {
                    let input: I =
                        serde_json::from_value(args.unwrap_or_else(|| serde_json::json!({})))
                            .map_err(|e| {
                                Error::JsonRpc(JsonRpcError::invalid_params(format!(
                                    "invalid tool arguments: {}",
                                    e
                                )))
                            })?;
                    handler(exchange, input).await
                })
            }),
        }
    }

    /// Finish with a handler that receives the raw JSON arguments.
    pub fn raw_handler<F, Fut>(self, handler: F) -> ToolSpec
    where
        F: Fn(Exchange, Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<CallToolResult>> + Send + 'static,
    {
        ToolSpec::new(
            Tool {
                name: self.name,
                description: self.description,
                input_schema: serde_json::json!({
                    "type": "object",
                    "additionalProperties": true
                }),
            },
            handler,
        )
    }
}

/// A resource descriptor paired with its read handler.
#[derive(Clone)]
pub struct ResourceSpec {
    pub resource: Resource,
    read: ResourceHandlerFn,
}

impl ResourceSpec {
    pub fn new<F, Fut>(resource: Resource, read: F) -> Self
    where
        F: Fn(Exchange, ReadResourceParams) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<ReadResourceResult>> + Send + 'static,
    {
        Self {
            resource,
            read: Arc::new(move |exchange, params| Box::pin(read(exchange, params))),
        }
    }

    /// A resource that always serves the given text.
    pub fn fixed_text(
        uri: impl Into<String>,
        name: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let uri = uri.into();
        let text = text.into();
        let contents = ResourceContents::text(uri.clone(), text);
        Self::new(
            Resource {
                uri,
                name: name.into(),
                description: None,
                mime_type: Some("text/plain".to_string()),
            },
            move |_exchange, _params| {
                let contents = contents.clone();
                async move {
                    Ok(ReadResourceResult {
                        contents: vec![contents],
                    })
                }
            },
        )
    }
}

/// A prompt descriptor paired with its get handler.
#[derive(Clone)]
pub struct PromptSpec {
    pub prompt: Prompt,
    get: PromptHandlerFn,
}

impl PromptSpec {
    pub fn new<F, Fut>(prompt: Prompt, get: F) -> Self
    where
        F: Fn(Exchange, GetPromptParams) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<GetPromptResult>> + Send + 'static,
    {
        Self {
            prompt,
            get: Arc::new(move |exchange, params| Box::pin(get(exchange, params))),
        }
    }
}

/// A completion handler keyed by the prompt/resource reference it serves.
#[derive(Clone)]
pub struct CompletionSpec {
    pub reference: CompleteReference,
    complete: CompletionHandlerFn,
}

impl CompletionSpec {
    pub fn new<F, Fut>(reference: CompleteReference, complete: F) -> Self
    where
        F: Fn(Exchange, CompleteParams) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<CompleteResult>> + Send + 'static,
    {
        Self {
            reference,
            complete: Arc::new(move |exchange, params| Box::pin(complete(exchange, params))),
        }
    }
}

// =============================================================================
// Server state
// =============================================================================

struct ServerState {
    info: Implementation,
    capabilities: ServerCapabilities,
    instructions: Option<String>,
    codec: JsonCodec,
    tools: RwLock<HashMap<String, ToolSpec>>,
    resources: RwLock<HashMap<String, ResourceSpec>>,
    resource_templates: RwLock<Vec<ResourceTemplate>>,
    prompts: RwLock<HashMap<String, PromptSpec>>,
    completions: HashMap<CompleteReference, CompletionSpec>,
    roots_change_consumers: Vec<RootsChangeConsumer>,
    subscriptions: Mutex<HashSet<String>>,
    min_log_level: Arc<RwLock<LoggingLevel>>,
    initialize_received: AtomicBool,
    session: OnceLock<Session>,
}

impl ServerState {
    fn session(&self) -> Result<Session> {
        self.session
            .get()
            .cloned()
            .ok_or_else(|| Error::Internal("session not wired".to_string()))
    }

    fn exchange(&self) -> Result<Exchange> {
        Ok(Exchange::new(
            self.session()?,
            self.min_log_level.clone(),
            self.capabilities.logging.is_some(),
        ))
    }

    fn handle_initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        if self.initialize_received.swap(true, Ordering::AcqRel) {
            return Err(Error::JsonRpc(JsonRpcError::invalid_request(
                "initialize already received",
            )));
        }

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&params.protocol_version.as_str()) {
            tracing::warn!(
                requested = %params.protocol_version,
                supported = %LATEST_PROTOCOL_VERSION,
                "client requested unsupported protocol version"
            );
        }

        tracing::info!(
            client = %params.client_info.name,
            version = %params.client_info.version,
            "client connected"
        );
        let session = self.session()?;
        session.set_peer(Peer::Client {
            info: params.client_info,
            capabilities: params.capabilities,
        });
        session.mark_handshake_responded();

        Ok(InitializeResult {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: self.capabilities.clone(),
            server_info: self.info.clone(),
            instructions: self.instructions.clone(),
        })
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder assembling a server's features before the session starts.
pub struct McpServerBuilder {
    info: Implementation,
    capabilities: Option<ServerCapabilities>,
    instructions: Option<String>,
    codec: JsonCodec,
    request_timeout: Option<Duration>,
    tools: HashMap<String, ToolSpec>,
    resources: HashMap<String, ResourceSpec>,
    resource_templates: Vec<ResourceTemplate>,
    prompts: HashMap<String, PromptSpec>,
    completions: HashMap<CompleteReference, CompletionSpec>,
    roots_change_consumers: Vec<RootsChangeConsumer>,
}

impl Default for McpServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl McpServerBuilder {
    pub fn new() -> Self {
        Self {
            info: Implementation::new("duplex-mcp-server", env!("CARGO_PKG_VERSION")),
            capabilities: None,
            instructions: None,
            codec: JsonCodec::new(),
            request_timeout: None,
            tools: HashMap::new(),
            resources: HashMap::new(),
            resource_templates: Vec::new(),
            prompts: HashMap::new(),
            completions: HashMap::new(),
            roots_change_consumers: Vec::new(),
        }
    }

    pub fn server_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.info = Implementation::new(name, version);
        self
    }

    /// Declare capabilities explicitly. When not set, they are derived from
    /// the registered features (logging is always declared).
    pub fn capabilities(mut self, capabilities: ServerCapabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn codec(mut self, codec: JsonCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Deadline for server-originated requests (`roots/list`,
    /// `sampling/createMessage`).
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn tool(mut self, spec: ToolSpec) -> Self {
        self.tools.insert(spec.tool.name.clone(), spec);
        self
    }

    pub fn resource(mut self, spec: ResourceSpec) -> Self {
        self.resources.insert(spec.resource.uri.clone(), spec);
        self
    }

    pub fn resource_template(mut self, template: ResourceTemplate) -> Self {
        self.resource_templates.push(template);
        self
    }

    pub fn prompt(mut self, spec: PromptSpec) -> Self {
        self.prompts.insert(spec.prompt.name.clone(), spec);
        self
    }

    pub fn completion(mut self, spec: CompletionSpec) -> Self {
        self.completions.insert(spec.reference.clone(), spec);
        self
    }

    /// React to the client's `notifications/roots/list_changed`: the server
    /// re-fetches `roots/list` and feeds the new list to the consumer.
    pub fn roots_change_consumer<F, Fut>(mut self, consumer: F) -> Self
    where
        F: Fn(Exchange, Vec<Root>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.roots_change_consumers
            .push(Arc::new(move |exchange, roots| {
                Box::pin(consumer(exchange, roots))
            }));
        self
    }

    fn derived_capabilities(&self) -> ServerCapabilities {
        let mut builder = ServerCapabilities::builder().logging();
        if !self.tools.is_empty() {
            builder = builder.tools(false);
        }
        if !self.resources.is_empty() {
            builder = builder.resources(false, false);
        }
        if !self.prompts.is_empty() {
            builder = builder.prompts(false);
        }
        if !self.completions.is_empty() {
            builder = builder.completions();
        }
        builder.build()
    }

    /// Build the session over `transport`, register every handler the
    /// declared capabilities call for, and start it. The session is Ready
    /// once the client's `notifications/initialized` arrives.
    pub async fn serve(self, transport: impl Transport) -> Result<McpServer> {
        let capabilities = self
            .capabilities
            .clone()
            .unwrap_or_else(|| self.derived_capabilities());
        let codec = self.codec;

        let state = Arc::new(ServerState {
            info: self.info,
            capabilities: capabilities.clone(),
            instructions: self.instructions,
            codec,
            tools: RwLock::new(self.tools),
            resources: RwLock::new(self.resources),
            resource_templates: RwLock::new(self.resource_templates),
            prompts: RwLock::new(self.prompts),
            completions: self.completions,
            roots_change_consumers: self.roots_change_consumers,
            subscriptions: Mutex::new(HashSet::new()),
            min_log_level: Arc::new(RwLock::new(LoggingLevel::Debug)),
            initialize_received: AtomicBool::new(false),
            session: OnceLock::new(),
        });

        let mut builder = SessionBuilder::new(transport).codec(codec);
        if let Some(timeout) = self.request_timeout {
            builder = builder.request_timeout(timeout);
        }

        // Lifecycle
        builder = builder.request_handler(methods::INITIALIZE, {
            let state = state.clone();
            move |params| {
                let state = state.clone();
                async move {
                    let params: InitializeParams = parse_params(&state.codec, params)?;
                    let result = state.handle_initialize(params)?;
                    state.codec.to_value(&result)
                }
            }
        });
        builder = builder.request_handler(methods::PING, {
            let state = state.clone();
            move |_params| {
                let state = state.clone();
                async move { state.codec.to_value(&EmptyResult {}) }
            }
        });
        builder = builder.notification_handler(notifications::INITIALIZED, {
            let state = state.clone();
            move |_params| {
                let state = state.clone();
                async move {
                    if state.session()?.mark_ready() {
                        tracing::debug!("session ready");
                    } else {
                        tracing::warn!("unexpected initialized notification");
                    }
                    Ok(())
                }
            }
        });
        builder = builder.notification_handler(notifications::CANCELLED, {
            move |params| async move {
                // Best effort: in-flight handlers observe shutdown through
                // their exchange; individual aborts are not tracked.
                tracing::debug!(params = ?params, "peer cancelled an inbound request");
                Ok(())
            }
        });

        // Tools
        if capabilities.tools.is_some() {
            builder = builder.request_handler(methods::TOOLS_LIST, {
                let state = state.clone();
                move |_params| {
                    let state = state.clone();
                    async move {
                        let mut tools: Vec<Tool> = state
                            .tools
                            .read()
                            .expect("tools lock poisoned")
                            .values()
                            .map(|spec| spec.tool.clone())
                            .collect();
                        tools.sort_by(|a, b| a.name.cmp(&b.name));
                        state.codec.to_value(&ListToolsResult {
                            tools,
                            next_cursor: None,
                        })
                    }
                }
            });
            builder = builder.request_handler(methods::TOOLS_CALL, {
                let state = state.clone();
                move |params| {
                    let state = state.clone();
                    async move {
                        let params: CallToolParams = parse_params(&state.codec, params)?;
                        let spec = state
                            .tools
                            .read()
                            .expect("tools lock poisoned")
                            .get(&params.name)
                            .cloned()
                            .ok_or_else(|| {
                                Error::JsonRpc(JsonRpcError::invalid_params(format!(
                                    "unknown tool: {}",
                                    params.name
                                )))
                            })?;
                        let result = (spec.call)(state.exchange()?, params.arguments).await?;
                        state.codec.to_value(&result)
                    }
                }
            });
        }

        // Resources
        if let Some(resources_capability) = capabilities.resources.clone() {
            builder = builder.request_handler(methods::RESOURCES_LIST, {
                let state = state.clone();
                move |_params| {
                    let state = state.clone();
                    async move {
                        let mut resources: Vec<Resource> = state
                            .resources
                            .read()
                            .expect("resources lock poisoned")
                            .values()
                            .map(|spec| spec.resource.clone())
                            .collect();
                        resources.sort_by(|a, b| a.uri.cmp(&b.uri));
                        state.codec.to_value(&ListResourcesResult {
                            resources,
                            next_cursor: None,
                        })
                    }
                }
            });
            builder = builder.request_handler(methods::RESOURCES_READ, {
                let state = state.clone();
                move |params| {
                    let state = state.clone();
                    async move {
                        let params: ReadResourceParams = parse_params(&state.codec, params)?;
                        let spec = state
                            .resources
                            .read()
                            .expect("resources lock poisoned")
                            .get(&params.uri)
                            .cloned()
                            .ok_or_else(|| {
                                Error::JsonRpc(JsonRpcError::invalid_params(format!(
                                    "resource not found: {}",
                                    params.uri
                                )))
                            })?;
                        let result = (spec.read)(state.exchange()?, params).await?;
                        state.codec.to_value(&result)
                    }
                }
            });
            builder = builder.request_handler(methods::RESOURCES_TEMPLATES_LIST, {
                let state = state.clone();
                move |_params| {
                    let state = state.clone();
                    async move {
                        let resource_templates = state
                            .resource_templates
                            .read()
                            .expect("templates lock poisoned")
                            .clone();
                        state.codec.to_value(&ListResourceTemplatesResult {
                            resource_templates,
                            next_cursor: None,
                        })
                    }
                }
            });

            // subscribe/unsubscribe only exist when the capability says so
            if resources_capability.subscribe {
                builder = builder.request_handler(methods::RESOURCES_SUBSCRIBE, {
                    let state = state.clone();
                    move |params| {
                        let state = state.clone();
                        async move {
                            let params: SubscribeParams = parse_params(&state.codec, params)?;
                            tracing::debug!(uri = %params.uri, "resource subscribed");
                            state
                                .subscriptions
                                .lock()
                                .expect("subscriptions lock poisoned")
                                .insert(params.uri);
                            state.codec.to_value(&EmptyResult {})
                        }
                    }
                });
                builder = builder.request_handler(methods::RESOURCES_UNSUBSCRIBE, {
                    let state = state.clone();
                    move |params| {
                        let state = state.clone();
                        async move {
                            let params: UnsubscribeParams = parse_params(&state.codec, params)?;
                            tracing::debug!(uri = %params.uri, "resource unsubscribed");
                            state
                                .subscriptions
                                .lock()
                                .expect("subscriptions lock poisoned")
                                .remove(&params.uri);
                            state.codec.to_value(&EmptyResult {})
                        }
                    }
                });
            }
        }

        // Prompts
        if capabilities.prompts.is_some() {
            builder = builder.request_handler(methods::PROMPTS_LIST, {
                let state = state.clone();
                move |_params| {
                    let state = state.clone();
                    async move {
                        let mut prompts: Vec<Prompt> = state
                            .prompts
                            .read()
                            .expect("prompts lock poisoned")
                            .values()
                            .map(|spec| spec.prompt.clone())
                            .collect();
                        prompts.sort_by(|a, b| a.name.cmp(&b.name));
                        state.codec.to_value(&ListPromptsResult {
                            prompts,
                            next_cursor: None,
                        })
                    }
                }
            });
            builder = builder.request_handler(methods::PROMPTS_GET, {
                let state = state.clone();
                move |params| {
                    let state = state.clone();
                    async move {
                        let params: GetPromptParams = parse_params(&state.codec, params)?;
                        let spec = state
                            .prompts
                            .read()
                            .expect("prompts lock poisoned")
                            .get(&params.name)
                            .cloned()
                            .ok_or_else(|| {
                                Error::JsonRpc(JsonRpcError::invalid_params(format!(
                                    "unknown prompt: {}",
                                    params.name
                                )))
                            })?;
                        let result = (spec.get)(state.exchange()?, params).await?;
                        state.codec.to_value(&result)
                    }
                }
            });
        }

        // Completion
        if capabilities.completions.is_some() {
            builder = builder.request_handler(methods::COMPLETION_COMPLETE, {
                let state = state.clone();
                move |params| {
                    let state = state.clone();
                    async move {
                        let params: CompleteParams = parse_params(&state.codec, params)?;
                        let spec = state.completions.get(&params.reference).ok_or_else(|| {
                            Error::JsonRpc(JsonRpcError::invalid_params(format!(
                                "no completion registered for {:?}",
                                params.reference
                            )))
                        })?;
                        let result = (spec.complete)(state.exchange()?, params.clone()).await?;
                        state.codec.to_value(&result)
                    }
                }
            });
        }

        // Logging
        if capabilities.logging.is_some() {
            builder = builder.request_handler(methods::LOGGING_SET_LEVEL, {
                let state = state.clone();
                move |params| {
                    let state = state.clone();
                    async move {
                        let params: SetLevelParams = parse_params(&state.codec, params)?;
                        tracing::debug!(level = %params.level, "logging level set");
                        *state.min_log_level.write().expect("level lock poisoned") = params.level;
                        state.codec.to_value(&EmptyResult {})
                    }
                }
            });
        }

        // Roots changes
        if !state.roots_change_consumers.is_empty() {
            builder = builder.notification_handler(notifications::ROOTS_LIST_CHANGED, {
                let state = state.clone();
                move |_params| {
                    let state = state.clone();
                    async move {
                        let exchange = state.exchange()?;
                        let listed = exchange.list_roots().await?;
                        for consumer in &state.roots_change_consumers {
                            if let Err(e) =
                                consumer(exchange.clone(), listed.roots.clone()).await
                            {
                                tracing::warn!(error = %e, "roots change consumer failed");
                            }
                        }
                        Ok(())
                    }
                }
            });
        }

        let session = builder.build();
        state
            .session
            .set(session.clone())
            .map_err(|_| Error::Internal("session wired twice".to_string()))?;
        session.start().await?;

        Ok(McpServer { session, state })
    }
}

// =============================================================================
// Server handle
// =============================================================================

/// Handle to a serving MCP session. Cloning is cheap; clones share the
/// registries and the session.
#[derive(Clone)]
pub struct McpServer {
    session: Session,
    state: Arc<ServerState>,
}

impl McpServer {
    pub fn builder() -> McpServerBuilder {
        McpServerBuilder::new()
    }

    /// The underlying session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// An exchange usable outside inbound handlers, e.g. for
    /// server-originated sampling. Peer requests are refused until the
    /// session is Ready.
    pub fn exchange(&self) -> Result<Exchange> {
        if !self.session.is_ready() {
            return Err(Error::Mcp("session not ready".to_string()));
        }
        self.state.exchange()
    }

    /// URIs with an active `resources/subscribe`.
    pub fn subscriptions(&self) -> HashSet<String> {
        self.state
            .subscriptions
            .lock()
            .expect("subscriptions lock poisoned")
            .clone()
    }

    /// Register a tool at runtime, replacing any previous tool with the
    /// same name, and publish `notifications/tools/list_changed`.
    pub async fn add_tool(&self, spec: ToolSpec) -> Result<()> {
        self.state
            .tools
            .write()
            .expect("tools lock poisoned")
            .insert(spec.tool.name.clone(), spec);
        self.notify_tools_list_changed().await
    }

    /// Remove a tool by name; publishes the change only if it existed.
    pub async fn remove_tool(&self, name: &str) -> Result<bool> {
        let removed = self
            .state
            .tools
            .write()
            .expect("tools lock poisoned")
            .remove(name)
            .is_some();
        if removed {
            self.notify_tools_list_changed().await?;
        }
        Ok(removed)
    }

    pub async fn add_resource(&self, spec: ResourceSpec) -> Result<()> {
        self.state
            .resources
            .write()
            .expect("resources lock poisoned")
            .insert(spec.resource.uri.clone(), spec);
        self.notify_resources_list_changed().await
    }

    pub async fn remove_resource(&self, uri: &str) -> Result<bool> {
        let removed = self
            .state
            .resources
            .write()
            .expect("resources lock poisoned")
            .remove(uri)
            .is_some();
        if removed {
            self.notify_resources_list_changed().await?;
        }
        Ok(removed)
    }

    pub async fn add_prompt(&self, spec: PromptSpec) -> Result<()> {
        self.state
            .prompts
            .write()
            .expect("prompts lock poisoned")
            .insert(spec.prompt.name.clone(), spec);
        self.notify_prompts_list_changed().await
    }

    pub async fn remove_prompt(&self, name: &str) -> Result<bool> {
        let removed = self
            .state
            .prompts
            .write()
            .expect("prompts lock poisoned")
            .remove(name)
            .is_some();
        if removed {
            self.notify_prompts_list_changed().await?;
        }
        Ok(removed)
    }

    /// Close the session and its transport.
    pub async fn close(&self) -> Result<()> {
        self.session.close().await
    }

    async fn notify_tools_list_changed(&self) -> Result<()> {
        let declared = self
            .state
            .capabilities
            .tools
            .as_ref()
            .map(|c| c.list_changed)
            .unwrap_or(false);
        self.publish_list_changed(declared, notifications::TOOLS_LIST_CHANGED)
            .await
    }

    async fn notify_resources_list_changed(&self) -> Result<()> {
        let declared = self
            .state
            .capabilities
            .resources
            .as_ref()
            .map(|c| c.list_changed)
            .unwrap_or(false);
        self.publish_list_changed(declared, notifications::RESOURCES_LIST_CHANGED)
            .await
    }

    async fn notify_prompts_list_changed(&self) -> Result<()> {
        let declared = self
            .state
            .capabilities
            .prompts
            .as_ref()
            .map(|c| c.list_changed)
            .unwrap_or(false);
        self.publish_list_changed(declared, notifications::PROMPTS_LIST_CHANGED)
            .await
    }

    async fn publish_list_changed(&self, declared: bool, method: &str) -> Result<()> {
        if !declared {
            tracing::debug!(method = %method, "list changed without capability, not notifying");
            return Ok(());
        }
        self.session.notify(method, None).await
    }
}

fn parse_params<T: DeserializeOwned>(codec: &JsonCodec, params: Option<Value>) -> Result<T> {
    let params =
        params.ok_or_else(|| Error::JsonRpc(JsonRpcError::invalid_params("missing params")))?;
    codec
        .from_value(params)
        .map_err(|e| Error::JsonRpc(JsonRpcError::invalid_params(e.to_string())))
}
