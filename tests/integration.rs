//! Integration tests for duplex-mcp
//!
//! Wires a real client and server over an in-memory byte-stream pair and
//! exercises the full protocol flow: lifecycle, tools, resources, prompts,
//! completion, logging, sampling, roots, cancellation, and the capability
//! gates.

use std::collections::HashMap;
use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;
use tokio::sync::mpsc;

use duplex_mcp::codec::JsonCodec;
use duplex_mcp::protocol::{
    CompleteReference, CompleteResult, Completion, Content, CreateMessageParams,
    CreateMessageResult, GetPromptResult, LoggingLevel, Prompt, PromptArgument, PromptMessage,
    Role, ServerCapabilities, StopReason,
};
use duplex_mcp::server::{CompletionSpec, PromptSpec, ResourceSpec};
use duplex_mcp::transport::StdioTransport;
use duplex_mcp::{
    CallToolResult, Error, McpClient, McpClientBuilder, McpServer, McpServerBuilder, Root,
    SessionPhase, ToolBuilder,
};

// =============================================================================
// Fixtures
// =============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
struct EchoInput {
    text: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct AddInput {
    a: i64,
    b: i64,
}

fn transport_pair() -> (StdioTransport, StdioTransport) {
    let (left, right) = tokio::io::duplex(64 * 1024);
    let (left_read, left_write) = tokio::io::split(left);
    let (right_read, right_write) = tokio::io::split(right);
    (
        StdioTransport::new(left_read, left_write, JsonCodec::new()),
        StdioTransport::new(right_read, right_write, JsonCodec::new()),
    )
}

fn test_server_builder() -> McpServerBuilder {
    let echo = ToolBuilder::new("echo")
        .description("Echo a message")
        .handler(|_exchange, input: EchoInput| async move { Ok(CallToolResult::text(input.text)) });

    let add = ToolBuilder::new("add")
        .description("Add two numbers")
        .handler(|_exchange, input: AddInput| async move {
            Ok(CallToolResult::text(format!("{}", input.a + input.b)))
        });

    let failing = ToolBuilder::new("failing")
        .description("A tool that always fails")
        .raw_handler(|_exchange, _args| async move {
            Err(Error::Mcp("intentional failure".to_string()))
        });

    let flagged = ToolBuilder::new("flagged")
        .description("Returns an error-flagged result")
        .raw_handler(|_exchange, _args| async move { Ok(CallToolResult::error("bad input")) });

    let readme = ResourceSpec::fixed_text("file:///README.md", "README", "# Test Project");

    let greet = PromptSpec::new(
        Prompt {
            name: "greet".to_string(),
            description: Some("Generate a greeting".to_string()),
            arguments: Some(vec![PromptArgument {
                name: "name".to_string(),
                description: Some("The name to greet".to_string()),
                required: Some(true),
            }]),
        },
        |_exchange, params| async move {
            let name = params
                .arguments
                .as_ref()
                .and_then(|args| args.get("name").cloned())
                .unwrap_or_else(|| "World".to_string());
            Ok(GetPromptResult {
                description: Some("A friendly greeting".to_string()),
                messages: vec![PromptMessage {
                    role: Role::User,
                    content: Content::text(format!("Please greet {} warmly.", name)),
                }],
            })
        },
    );

    let complete_greet = CompletionSpec::new(
        CompleteReference::Prompt {
            name: "greet".to_string(),
        },
        |_exchange, params| async move {
            let candidates = ["Alice", "Albert", "Bob"];
            let values = candidates
                .iter()
                .filter(|candidate| candidate.starts_with(&params.argument.value))
                .map(|candidate| candidate.to_string())
                .collect::<Vec<_>>();
            let total = values.len() as i64;
            Ok(CompleteResult {
                completion: Completion {
                    values,
                    total: Some(total),
                    has_more: Some(false),
                },
            })
        },
    );

    McpServer::builder()
        .server_info("s", "0.1.0")
        .instructions("Test server")
        .capabilities(
            ServerCapabilities::builder()
                .tools(true)
                .resources(true, true)
                .prompts(true)
                .logging()
                .completions()
                .build(),
        )
        .tool(echo)
        .tool(add)
        .tool(failing)
        .tool(flagged)
        .resource(readme)
        .prompt(greet)
        .completion(complete_greet)
}

async fn connect(
    server_builder: McpServerBuilder,
    client_builder: McpClientBuilder,
) -> (McpClient, McpServer) {
    let (client_transport, server_transport) = transport_pair();
    let server = server_builder
        .serve(server_transport)
        .await
        .expect("server serves");
    let client = client_builder
        .client_info("t", "0")
        .connect(client_transport)
        .await
        .expect("client connects");
    (client, server)
}

async fn connected_pair() -> (McpClient, McpServer) {
    let (client, server) = connect(test_server_builder(), McpClient::builder()).await;
    client.initialize().await.expect("initialize succeeds");
    (client, server)
}

/// Poll until the condition holds; the handshake's final transition runs on
/// its own task, so tests that need the server Ready wait for it.
async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within deadline");
}

async fn server_ready(server: &McpServer) {
    let session = server.session().clone();
    wait_until(move || session.phase() == SessionPhase::Ready).await;
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn handshake_reaches_ready_on_both_sides() {
    let (client, server) = connect(test_server_builder(), McpClient::builder()).await;

    let init = client.initialize().await.unwrap();
    assert_eq!(init.protocol_version, "2024-11-05");
    assert_eq!(init.server_info.name, "s");
    assert_eq!(init.instructions.as_deref(), Some("Test server"));
    assert!(client.is_initialized());

    server_ready(&server).await;

    // Both sides recorded their peer.
    assert_eq!(client.server_info().unwrap().name, "s");
    let peer = server.session().peer().expect("server saw the client");
    assert_eq!(peer.info().name, "t");
}

#[tokio::test]
async fn requests_before_initialize_are_invalid_request() {
    let (client, _server) = connect(test_server_builder(), McpClient::builder()).await;

    // Straight to the session, skipping the handshake.
    let err = client
        .session()
        .request("tools/list", None)
        .await
        .unwrap_err();
    match err {
        Error::JsonRpc(e) => assert_eq!(e.code, -32600),
        other => panic!("expected InvalidRequest, got {:?}", other),
    }
}

#[tokio::test]
async fn ping_is_allowed_before_initialize() {
    let (client, _server) = connect(test_server_builder(), McpClient::builder()).await;
    let result = client.session().request("ping", None).await.unwrap();
    assert_eq!(result, serde_json::json!({}));
}

#[tokio::test]
async fn repeated_initialize_is_invalid_request() {
    let (client, _server) = connected_pair().await;

    let params = serde_json::json!({
        "protocolVersion": "2024-11-05",
        "capabilities": {},
        "clientInfo": {"name": "t", "version": "0"}
    });
    let err = client
        .session()
        .request("initialize", Some(params))
        .await
        .unwrap_err();
    match err {
        Error::JsonRpc(e) => assert_eq!(e.code, -32600),
        other => panic!("expected InvalidRequest, got {:?}", other),
    }
}

#[tokio::test]
async fn typed_calls_refused_until_initialized() {
    let (client, _server) = connect(test_server_builder(), McpClient::builder()).await;
    assert!(matches!(
        client.list_tools(None).await.unwrap_err(),
        Error::Mcp(_)
    ));
}

#[tokio::test]
async fn close_is_idempotent_and_fails_new_requests() {
    let (client, server) = connected_pair().await;

    client.close().await.unwrap();
    client.close().await.unwrap();
    assert_eq!(client.session().phase(), SessionPhase::Closed);

    assert!(matches!(
        client.ping().await.unwrap_err(),
        Error::SessionClosed | Error::Mcp(_)
    ));

    server.close().await.unwrap();
}

// =============================================================================
// Tools
// =============================================================================

#[tokio::test]
async fn tools_list_returns_sorted_catalog() {
    let (client, _server) = connected_pair().await;

    let listed = client.list_tools(None).await.unwrap();
    let names: Vec<&str> = listed.tools.iter().map(|tool| tool.name.as_str()).collect();
    assert_eq!(names, vec!["add", "echo", "failing", "flagged"]);
    assert!(listed.next_cursor.is_none());
}

#[tokio::test]
async fn tool_call_echo_round_trip() {
    let (client, _server) = connected_pair().await;

    let result = client
        .call_tool("echo", serde_json::json!({"text": "hi"}))
        .await
        .unwrap();
    assert!(!result.is_error);
    assert_eq!(result.content[0].as_text(), Some("hi"));
}

#[tokio::test]
async fn tool_call_add() {
    let (client, _server) = connected_pair().await;

    let result = client
        .call_tool("add", serde_json::json!({"a": 19, "b": 23}))
        .await
        .unwrap();
    assert_eq!(result.content[0].as_text(), Some("42"));
}

#[tokio::test]
async fn unknown_tool_is_invalid_params() {
    let (client, _server) = connected_pair().await;

    let err = client
        .call_tool("bogus", serde_json::json!({}))
        .await
        .unwrap_err();
    match err {
        Error::JsonRpc(e) => assert_eq!(e.code, -32602),
        other => panic!("expected InvalidParams, got {:?}", other),
    }
}

#[tokio::test]
async fn malformed_tool_arguments_are_invalid_params() {
    let (client, _server) = connected_pair().await;

    let err = client
        .call_tool("add", serde_json::json!({"a": "not a number"}))
        .await
        .unwrap_err();
    match err {
        Error::JsonRpc(e) => assert_eq!(e.code, -32602),
        other => panic!("expected InvalidParams, got {:?}", other),
    }
}

#[tokio::test]
async fn handler_failure_maps_to_internal_error() {
    let (client, _server) = connected_pair().await;

    let err = client
        .call_tool("failing", serde_json::json!({}))
        .await
        .unwrap_err();
    match err {
        Error::JsonRpc(e) => assert_eq!(e.code, -32603),
        other => panic!("expected InternalError, got {:?}", other),
    }
}

#[tokio::test]
async fn error_flagged_result_is_not_a_protocol_error() {
    let (client, _server) = connected_pair().await;

    let result = client
        .call_tool("flagged", serde_json::json!({}))
        .await
        .unwrap();
    assert!(result.is_error);
    assert_eq!(result.content[0].as_text(), Some("bad input"));
}

#[tokio::test]
async fn unknown_method_is_method_not_found() {
    let (client, _server) = connected_pair().await;

    let err = client.session().request("bogus", None).await.unwrap_err();
    match err {
        Error::JsonRpc(e) => {
            assert_eq!(e.code, -32601);
            assert!(e.message.contains("Method not found"));
        }
        other => panic!("expected MethodNotFound, got {:?}", other),
    }
}

#[tokio::test]
async fn concurrent_tool_calls_correlate_by_id() {
    let (client, _server) = connected_pair().await;

    let mut handles = Vec::new();
    for n in 0..8i64 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let result = client
                .call_tool("add", serde_json::json!({"a": n, "b": 100}))
                .await
                .unwrap();
            (n, result.content[0].as_text().unwrap().to_string())
        }));
    }
    for handle in handles {
        let (n, text) = handle.await.unwrap();
        assert_eq!(text, (n + 100).to_string());
    }
}

#[tokio::test]
async fn stuck_handler_does_not_block_other_requests() {
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    let release_rx = std::sync::Arc::new(tokio::sync::Mutex::new(Some(release_rx)));

    let stuck = ToolBuilder::new("stuck")
        .description("Blocks until released")
        .raw_handler(move |_exchange, _args| {
            let release_rx = release_rx.clone();
            async move {
                if let Some(rx) = release_rx.lock().await.take() {
                    let _ = rx.await;
                }
                Ok(CallToolResult::text("released"))
            }
        });

    let (client, _server) = connect(test_server_builder().tool(stuck), McpClient::builder()).await;
    client.initialize().await.unwrap();

    let stuck_call = {
        let client = client.clone();
        tokio::spawn(async move { client.call_tool("stuck", serde_json::json!({})).await })
    };

    // The reader stays live while the handler is parked.
    for _ in 0..3 {
        client.ping().await.unwrap();
    }

    release_tx.send(()).unwrap();
    let result = stuck_call.await.unwrap().unwrap();
    assert_eq!(result.content[0].as_text(), Some("released"));
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn deadline_expiry_times_out_and_session_survives() {
    let never = ToolBuilder::new("never")
        .description("Never finishes")
        .raw_handler(|_exchange, _args| async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(CallToolResult::text("unreachable"))
        });

    let (client, _server) = connect(test_server_builder().tool(never), McpClient::builder()).await;
    client.initialize().await.unwrap();

    let err = client
        .session()
        .request_with_timeout(
            "tools/call",
            Some(serde_json::json!({"name": "never", "arguments": {}})),
            Some(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout));

    // The cancelled id is retired; the session keeps working.
    let result = client
        .call_tool("echo", serde_json::json!({"text": "still alive"}))
        .await
        .unwrap();
    assert_eq!(result.content[0].as_text(), Some("still alive"));
}

// =============================================================================
// Resources
// =============================================================================

#[tokio::test]
async fn resources_list_and_read() {
    let (client, _server) = connected_pair().await;

    let listed = client.list_resources(None).await.unwrap();
    assert_eq!(listed.resources.len(), 1);
    assert_eq!(listed.resources[0].uri, "file:///README.md");

    let read = client.read_resource("file:///README.md").await.unwrap();
    match &read.contents[0] {
        duplex_mcp::ResourceContents::Text { text, .. } => assert_eq!(text, "# Test Project"),
        other => panic!("expected text contents, got {:?}", other),
    }
}

#[tokio::test]
async fn unknown_resource_is_invalid_params() {
    let (client, _server) = connected_pair().await;

    let err = client.read_resource("file:///missing").await.unwrap_err();
    match err {
        Error::JsonRpc(e) => assert_eq!(e.code, -32602),
        other => panic!("expected InvalidParams, got {:?}", other),
    }
}

#[tokio::test]
async fn subscribe_then_unsubscribe_restores_the_set() {
    let (client, server) = connected_pair().await;

    client.subscribe("file:///README.md").await.unwrap();
    assert!(server.subscriptions().contains("file:///README.md"));

    client.unsubscribe("file:///README.md").await.unwrap();
    assert!(server.subscriptions().is_empty());
}

#[tokio::test]
async fn subscribe_without_capability_is_method_not_found() {
    let server_builder = test_server_builder().capabilities(
        ServerCapabilities::builder()
            .tools(true)
            .resources(false, true)
            .build(),
    );
    let (client, _server) = connect(server_builder, McpClient::builder()).await;
    client.initialize().await.unwrap();

    let err = client.subscribe("file:///README.md").await.unwrap_err();
    match err {
        Error::JsonRpc(e) => assert_eq!(e.code, -32601),
        other => panic!("expected MethodNotFound, got {:?}", other),
    }
}

// =============================================================================
// Prompts and completion
// =============================================================================

#[tokio::test]
async fn prompts_get_with_arguments() {
    let (client, _server) = connected_pair().await;

    let listed = client.list_prompts(None).await.unwrap();
    assert_eq!(listed.prompts[0].name, "greet");

    let mut arguments = HashMap::new();
    arguments.insert("name".to_string(), "Alice".to_string());
    let prompt = client.get_prompt("greet", Some(arguments)).await.unwrap();
    assert_eq!(
        prompt.messages[0].content.as_text(),
        Some("Please greet Alice warmly.")
    );
}

#[tokio::test]
async fn completion_filters_by_argument_value() {
    let (client, _server) = connected_pair().await;

    let result = client
        .complete(
            CompleteReference::Prompt {
                name: "greet".to_string(),
            },
            "name",
            "Al",
        )
        .await
        .unwrap();
    assert_eq!(result.completion.values, vec!["Alice", "Albert"]);
    assert_eq!(result.completion.total, Some(2));
}

// =============================================================================
// Logging
// =============================================================================

#[tokio::test]
async fn logging_respects_minimum_level() {
    let (log_tx, mut log_rx) = mpsc::unbounded_channel();
    let client_builder = McpClient::builder().logging_consumer(move |params| {
        let log_tx = log_tx.clone();
        async move {
            let _ = log_tx.send(params);
            Ok(())
        }
    });

    let (client, server) = connect(test_server_builder(), client_builder).await;
    client.initialize().await.unwrap();
    server_ready(&server).await;

    client.set_logging_level(LoggingLevel::Warning).await.unwrap();

    let exchange = server.exchange().unwrap();
    exchange
        .log_text(LoggingLevel::Info, "test", "below threshold")
        .await
        .unwrap();
    exchange
        .log_text(LoggingLevel::Error, "test", "over threshold")
        .await
        .unwrap();

    let received = log_rx.recv().await.unwrap();
    assert_eq!(received.level, LoggingLevel::Error);
    assert_eq!(
        received.data,
        Some(serde_json::Value::String("over threshold".to_string()))
    );
}

// =============================================================================
// Server-originated traffic
// =============================================================================

#[tokio::test]
async fn sampling_delegates_to_the_client_handler() {
    let client_builder = McpClient::builder().sampling_handler(|params: CreateMessageParams| {
        async move {
            let prompt = params.messages[0].content.as_text().unwrap_or("").to_string();
            Ok(CreateMessageResult {
                role: Role::Assistant,
                content: Content::text(format!("sampled: {}", prompt)),
                model: "test-model".to_string(),
                stop_reason: Some(StopReason::EndTurn),
            })
        }
    });

    let (client, server) = connect(test_server_builder(), client_builder).await;
    client.initialize().await.unwrap();
    server_ready(&server).await;

    let exchange = server.exchange().unwrap();
    let result = exchange
        .create_message(CreateMessageParams {
            messages: vec![duplex_mcp::protocol::SamplingMessage {
                role: Role::User,
                content: Content::text("hello"),
            }],
            model_preferences: None,
            system_prompt: None,
            include_context: None,
            temperature: None,
            max_tokens: 64,
            stop_sequences: None,
            metadata: None,
        })
        .await
        .unwrap();

    assert_eq!(result.model, "test-model");
    assert_eq!(result.content.as_text(), Some("sampled: hello"));
}

#[tokio::test]
async fn sampling_refused_locally_when_client_lacks_capability() {
    let (client, server) = connected_pair().await;
    server_ready(&server).await;
    let _ = &client;

    let exchange = server.exchange().unwrap();
    let err = exchange
        .create_message(CreateMessageParams {
            messages: vec![],
            model_preferences: None,
            system_prompt: None,
            include_context: None,
            temperature: None,
            max_tokens: 1,
            stop_sequences: None,
            metadata: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Mcp(_)));
}

#[tokio::test]
async fn roots_list_and_change_notification() {
    let (roots_tx, mut roots_rx) = mpsc::unbounded_channel();
    let server_builder = test_server_builder().roots_change_consumer(move |_exchange, roots| {
        let roots_tx = roots_tx.clone();
        async move {
            let _ = roots_tx.send(roots);
            Ok(())
        }
    });
    let client_builder = McpClient::builder().root(Root::new("file:///workspace"));

    let (client, server) = connect(server_builder, client_builder).await;
    client.initialize().await.unwrap();
    server_ready(&server).await;

    let listed = server.exchange().unwrap().list_roots().await.unwrap();
    assert_eq!(listed.roots.len(), 1);
    assert_eq!(listed.roots[0].uri, "file:///workspace");

    client
        .add_root(Root::with_name("file:///second", "second"))
        .await
        .unwrap();
    let updated = roots_rx.recv().await.unwrap();
    assert_eq!(updated.len(), 2);
}

// =============================================================================
// List-changed fan-out
// =============================================================================

#[tokio::test]
async fn tools_list_changed_fans_out_exactly_once() {
    let (changed_tx, mut changed_rx) = mpsc::unbounded_channel();
    let client_builder = McpClient::builder().tools_change_consumer(move |tools| {
        let changed_tx = changed_tx.clone();
        async move {
            let _ = changed_tx.send(tools);
            Ok(())
        }
    });

    let (client, server) = connect(test_server_builder(), client_builder).await;
    client.initialize().await.unwrap();

    let extra = ToolBuilder::new("extra")
        .description("Added at runtime")
        .raw_handler(|_exchange, _args| async move { Ok(CallToolResult::text("extra")) });
    server.add_tool(extra).await.unwrap();

    let tools = changed_rx.recv().await.unwrap();
    assert!(tools.iter().any(|tool| tool.name == "extra"));

    // Exactly one notification for one mutation.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(changed_rx.try_recv().is_err());
}

// =============================================================================
// Blocking façade
// =============================================================================

#[test]
fn blocking_client_round_trip() {
    let (client_transport, server_transport) = transport_pair();

    // The server gets its own runtime; its read loop lives on that
    // runtime's worker threads while the blocking client drives its own.
    let server_runtime = tokio::runtime::Runtime::new().unwrap();
    let _server = server_runtime
        .block_on(test_server_builder().serve(server_transport))
        .unwrap();

    let client = duplex_mcp::blocking::BlockingMcpClient::connect(
        McpClient::builder().client_info("blocking", "0"),
        client_transport,
    )
    .unwrap();

    let init = client.initialize().unwrap();
    assert_eq!(init.server_info.name, "s");

    let result = client
        .call_tool("echo", serde_json::json!({"text": "blocking"}))
        .unwrap();
    assert_eq!(result.content[0].as_text(), Some("blocking"));

    client.close().unwrap();
}

#[tokio::test]
async fn removing_unknown_tool_does_not_notify() {
    let (changed_tx, mut changed_rx) = mpsc::unbounded_channel();
    let client_builder = McpClient::builder().tools_change_consumer(move |tools| {
        let changed_tx = changed_tx.clone();
        async move {
            let _ = changed_tx.send(tools);
            Ok(())
        }
    });

    let (client, server) = connect(test_server_builder(), client_builder).await;
    client.initialize().await.unwrap();

    assert!(!server.remove_tool("does-not-exist").await.unwrap());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(changed_rx.try_recv().is_err());
}
