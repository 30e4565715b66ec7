#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Streamable HTTP connectors against a wiremock server.

use askr_config::{ServerConfig, Transport};
use askr_core::AskrError;
use askr_mcp::{ConnectorFactory, McpConnectorFactory};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn http_server(url: String) -> ServerConfig {
    let mut config = ServerConfig::stdio("remote", "unused", vec![]);
    config.transport = Transport::Http {
        url,
        headers: BTreeMap::from([("X-Api-Key".to_string(), "k1".to_string())]),
    };
    config
}

async fn mount_handshake(server: &MockServer, session: &str) {
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({"method": "initialize"})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Mcp-Session-Id", session)
                .set_body_json(json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "result": {
                        "protocolVersion": "2024-11-05",
                        "capabilities": {"tools": {}},
                        "serverInfo": {"name": "remote", "version": "1"}
                    }
                })),
        )
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({"method": "notifications/initialized"})))
        .respond_with(ResponseTemplate::new(202))
        .mount(server)
        .await;
}

#[tokio::test]
async fn http_handshake_session_and_sse_reply() {
    let server = MockServer::start().await;
    mount_handshake(&server, "sess-1").await;

    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(header("Mcp-Session-Id", "sess-1"))
        .and(header("X-Api-Key", "k1"))
        .and(body_partial_json(json!({"method": "tools/list"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "result": {"tools": [{"name": "lookup", "description": "Find things"}]}
        })))
        .mount(&server)
        .await;

    // Id 3: the first tools/call after initialize (1) and tools/list (2).
    let event = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":3,\"result\":{\"content\":[{\"type\":\"text\",\"text\":\"found it\"}]}}\n\n";
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(header("Mcp-Session-Id", "sess-1"))
        .and(body_partial_json(json!({"method": "tools/call"})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(event, "text/event-stream"))
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/mcp"))
        .and(header("Mcp-Session-Id", "sess-1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let connector = McpConnectorFactory::default()
        .create(&http_server(format!("{}/mcp", server.uri())))
        .unwrap();
    connector.connect(Duration::from_secs(5)).await.unwrap();

    let tools = connector.list_tools(Duration::from_secs(5)).await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "lookup");

    let out = connector
        .call_tool("lookup", json!({"q": "x"}), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(out, "found it");

    connector.close().await;
}

#[tokio::test]
async fn http_expired_session_reconnects_once() {
    let server = MockServer::start().await;
    mount_handshake(&server, "sess-2").await;

    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({"method": "tools/call"})))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({"method": "tools/call"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 5,
            "result": {"content": [{"type": "text", "text": "after reconnect"}]}
        })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let connector = McpConnectorFactory::default()
        .create(&http_server(format!("{}/mcp", server.uri())))
        .unwrap();
    connector.connect(Duration::from_secs(5)).await.unwrap();

    let out = connector
        .call_tool("anything", json!({}), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(out, "after reconnect");
    assert!(connector.is_healthy());

    let initializes = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| {
            serde_json::from_slice::<serde_json::Value>(&r.body)
                .map(|v| v["method"] == "initialize")
                .unwrap_or(false)
        })
        .count();
    assert_eq!(initializes, 2);
    connector.close().await;
}

#[tokio::test]
async fn http_server_down_is_connection_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let connector = McpConnectorFactory::default()
        .create(&http_server(format!("{}/mcp", server.uri())))
        .unwrap();
    let err = connector.connect(Duration::from_secs(5)).await.unwrap_err();
    match err {
        AskrError::Connection { server, message } => {
            assert_eq!(server, "remote");
            assert!(message.contains("503"), "{message}");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn http_json_rpc_error_is_tool_error() {
    let server = MockServer::start().await;
    mount_handshake(&server, "sess-3").await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "tools/call"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "error": {"code": -32602, "message": "Unknown tool: nope"}
        })))
        .mount(&server)
        .await;

    let connector = McpConnectorFactory::default()
        .create(&http_server(format!("{}/mcp", server.uri())))
        .unwrap();
    connector.connect(Duration::from_secs(5)).await.unwrap();
    let err = connector
        .call_tool("nope", json!({}), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, AskrError::ToolInvocation { .. }));
    assert!(err.to_string().contains("Unknown tool: nope"), "{err}");
    assert!(connector.is_healthy());
}

#[tokio::test]
async fn http_status_failure_is_not_retried() {
    let server = MockServer::start().await;
    mount_handshake(&server, "sess-4").await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "tools/call"})))
        .respond_with(ResponseTemplate::new(500).set_body_string("tool crashed"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let connector = McpConnectorFactory::default()
        .create(&http_server(format!("{}/mcp", server.uri())))
        .unwrap();
    connector.connect(Duration::from_secs(5)).await.unwrap();

    let err = connector
        .call_tool("transfer_funds", json!({"amount": 10}), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, AskrError::ToolInvocation { .. }));
    assert!(err.to_string().contains("500"), "{err}");
    assert!(connector.is_healthy());

    let initializes = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| {
            serde_json::from_slice::<serde_json::Value>(&r.body)
                .map(|v| v["method"] == "initialize")
                .unwrap_or(false)
        })
        .count();
    assert_eq!(initializes, 1);
    connector.close().await;
}

#[tokio::test]
async fn http_server_ping_in_response_stream_is_answered() {
    let server = MockServer::start().await;
    mount_handshake(&server, "sess-5").await;

    // The server reuses the call's id (2) for its own ping.
    let events = concat!(
        "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"ping\"}\n\n",
        "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{\"content\":[{\"type\":\"text\",\"text\":\"done\"}]}}\n\n",
    );
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "tools/call"})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(events, "text/event-stream"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(header("Mcp-Session-Id", "sess-5"))
        .and(body_partial_json(json!({"id": 2, "result": {}})))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let connector = McpConnectorFactory::default()
        .create(&http_server(format!("{}/mcp", server.uri())))
        .unwrap();
    connector.connect(Duration::from_secs(5)).await.unwrap();

    let out = connector
        .call_tool("slow", json!({}), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(out, "done");
    connector.close().await;
}
