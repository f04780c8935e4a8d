//! SSE transport tests
//!
//! Drives a real client/server pair over HTTP: endpoint discovery through
//! the `endpoint` event, POSTed requests, and responses plus
//! server-originated notifications on the event stream.

use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;
use tokio::sync::mpsc;

use duplex_mcp::codec::JsonCodec;
use duplex_mcp::protocol::{LoggingLevel, ServerCapabilities};
use duplex_mcp::transport::sse::SseClientTransport;
use duplex_mcp::transport::sse_server::SseServerTransport;
use duplex_mcp::{CallToolResult, Error, McpClient, McpServer, SessionPhase, ToolBuilder, Transport};

#[derive(Debug, Deserialize, JsonSchema)]
struct EchoInput {
    text: String,
}

async fn serve_echo_over_sse() -> (McpServer, url::Url) {
    let transport = SseServerTransport::bind("127.0.0.1:0".parse().unwrap(), JsonCodec::new())
        .await
        .expect("bind SSE server");
    let base_url = transport.base_url();

    let echo = ToolBuilder::new("echo")
        .description("Echo a message")
        .handler(|_exchange, input: EchoInput| async move { Ok(CallToolResult::text(input.text)) });

    let server = McpServer::builder()
        .server_info("sse-server", "0.1.0")
        .capabilities(
            ServerCapabilities::builder()
                .tools(true)
                .logging()
                .build(),
        )
        .tool(echo)
        .serve(transport)
        .await
        .expect("server serves");

    (server, base_url)
}

#[tokio::test]
async fn tool_call_round_trips_over_sse() {
    let (server, base_url) = serve_echo_over_sse().await;

    let client = McpClient::builder()
        .client_info("sse-client", "0")
        .connect(SseClientTransport::builder(base_url).build())
        .await
        .expect("client connects");

    let init = client.initialize().await.expect("handshake completes");
    assert_eq!(init.server_info.name, "sse-server");

    let result = client
        .call_tool("echo", serde_json::json!({"text": "hi over sse"}))
        .await
        .unwrap();
    assert_eq!(result.content[0].as_text(), Some("hi over sse"));

    client.close().await.unwrap();
    server.close().await.unwrap();
}

#[tokio::test]
async fn server_notifications_arrive_on_the_event_stream() {
    let (server, base_url) = serve_echo_over_sse().await;

    let (log_tx, mut log_rx) = mpsc::unbounded_channel();
    let client = McpClient::builder()
        .client_info("sse-client", "0")
        .logging_consumer(move |params| {
            let log_tx = log_tx.clone();
            async move {
                let _ = log_tx.send(params);
                Ok(())
            }
        })
        .connect(SseClientTransport::builder(base_url).build())
        .await
        .unwrap();
    client.initialize().await.unwrap();

    {
        let session = server.session().clone();
        for _ in 0..200 {
            if session.phase() == SessionPhase::Ready {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    server
        .exchange()
        .unwrap()
        .log_text(LoggingLevel::Error, "sse-test", "server says hi")
        .await
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), log_rx.recv())
        .await
        .expect("log arrives in time")
        .unwrap();
    assert_eq!(received.level, LoggingLevel::Error);

    client.close().await.unwrap();
    server.close().await.unwrap();
}

#[tokio::test]
async fn second_subscriber_is_refused() {
    let (server, base_url) = serve_echo_over_sse().await;

    let client = McpClient::builder()
        .connect(SseClientTransport::builder(base_url.clone()).build())
        .await
        .unwrap();
    client.initialize().await.unwrap();

    let response = reqwest::Client::new()
        .get(base_url.join("/sse").unwrap())
        .header("Accept", "text/event-stream")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CONFLICT);

    client.close().await.unwrap();
    server.close().await.unwrap();
}

#[tokio::test]
async fn post_with_wrong_session_token_is_refused() {
    let (server, base_url) = serve_echo_over_sse().await;

    let client = McpClient::builder()
        .connect(SseClientTransport::builder(base_url.clone()).build())
        .await
        .unwrap();
    client.initialize().await.unwrap();

    let response = reqwest::Client::new()
        .post(base_url.join("/message?sessionId=wrong").unwrap())
        .header("Content-Type", "application/json")
        .body(r#"{"jsonrpc":"2.0","id":99,"method":"ping"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    client.close().await.unwrap();
    server.close().await.unwrap();
}

#[tokio::test]
async fn send_without_endpoint_discovery_fails_after_timeout() {
    // The configured deadline, not the wire, decides how long we wait.
    let transport = SseClientTransport::builder(url::Url::parse("http://127.0.0.1:1").unwrap())
        .endpoint_timeout(Duration::from_millis(100))
        .build();

    let started = std::time::Instant::now();
    let err = transport
        .send(duplex_mcp::Message::Notification(
            duplex_mcp::Notification::new("ping"),
        ))
        .await
        .unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(2));
    match err {
        Error::Mcp(message) => assert_eq!(message, "failed to wait for message endpoint"),
        other => panic!("expected endpoint failure, got {:?}", other),
    }
}
