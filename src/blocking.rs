//! Blocking client façade
//!
//! Bridges the async client onto a dedicated multi-thread runtime so the
//! session's read loop keeps running between calls. There is exactly one
//! session state machine; this wrapper only awaits it.

use std::collections::HashMap;

use serde_json::Value;

use crate::client::{McpClient, McpClientBuilder};
use crate::error::{Error, Result};
use crate::protocol::{
    CallToolResult, CompleteReference, CompleteResult, GetPromptResult, InitializeResult,
    ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult, ListToolsResult,
    LoggingLevel, ReadResourceResult, Root,
};
use crate::transport::Transport;

/// Blocking wrapper around [`McpClient`].
///
/// # Example
///
/// ```rust,ignore
/// let client = BlockingMcpClient::connect(
///     McpClient::builder().client_info("cli", "1.0.0"),
///     transport,
/// )?;
/// client.initialize()?;
/// let tools = client.list_tools(None)?;
/// ```
pub struct BlockingMcpClient {
    runtime: tokio::runtime::Runtime,
    client: McpClient,
}

impl BlockingMcpClient {
    /// Spin up a runtime and connect the transport on it.
    pub fn connect(builder: McpClientBuilder, transport: impl Transport) -> Result<Self> {
        let runtime = tokio::runtime::Runtime::new()
            .map_err(|e| Error::Internal(format!("failed to create runtime: {}", e)))?;
        let client = runtime.block_on(builder.connect(transport))?;
        Ok(Self { runtime, client })
    }

    /// The async client, for mixed usage.
    pub fn inner(&self) -> &McpClient {
        &self.client
    }

    pub fn initialize(&self) -> Result<InitializeResult> {
        self.runtime.block_on(self.client.initialize())
    }

    pub fn ping(&self) -> Result<()> {
        self.runtime.block_on(self.client.ping())
    }

    pub fn list_tools(&self, cursor: Option<String>) -> Result<ListToolsResult> {
        self.runtime.block_on(self.client.list_tools(cursor))
    }

    pub fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        self.runtime.block_on(self.client.call_tool(name, arguments))
    }

    pub fn list_resources(&self, cursor: Option<String>) -> Result<ListResourcesResult> {
        self.runtime.block_on(self.client.list_resources(cursor))
    }

    pub fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        self.runtime.block_on(self.client.read_resource(uri))
    }

    pub fn list_resource_templates(
        &self,
        cursor: Option<String>,
    ) -> Result<ListResourceTemplatesResult> {
        self.runtime
            .block_on(self.client.list_resource_templates(cursor))
    }

    pub fn subscribe(&self, uri: &str) -> Result<()> {
        self.runtime.block_on(self.client.subscribe(uri))
    }

    pub fn unsubscribe(&self, uri: &str) -> Result<()> {
        self.runtime.block_on(self.client.unsubscribe(uri))
    }

    pub fn list_prompts(&self, cursor: Option<String>) -> Result<ListPromptsResult> {
        self.runtime.block_on(self.client.list_prompts(cursor))
    }

    pub fn get_prompt(
        &self,
        name: &str,
        arguments: Option<HashMap<String, String>>,
    ) -> Result<GetPromptResult> {
        self.runtime.block_on(self.client.get_prompt(name, arguments))
    }

    pub fn set_logging_level(&self, level: LoggingLevel) -> Result<()> {
        self.runtime.block_on(self.client.set_logging_level(level))
    }

    pub fn complete(
        &self,
        reference: CompleteReference,
        argument_name: &str,
        argument_value: &str,
    ) -> Result<CompleteResult> {
        self.runtime
            .block_on(self.client.complete(reference, argument_name, argument_value))
    }

    pub fn add_root(&self, root: Root) -> Result<()> {
        self.runtime.block_on(self.client.add_root(root))
    }

    pub fn remove_root(&self, uri: &str) -> Result<bool> {
        self.runtime.block_on(self.client.remove_root(uri))
    }

    pub fn close(self) -> Result<()> {
        let result = self.runtime.block_on(self.client.close());
        // Drop the runtime off this thread's context.
        self.runtime.shutdown_background();
        result
    }
}
