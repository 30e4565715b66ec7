#![allow(clippy::unwrap_used, clippy::expect_used)]
#![cfg(unix)]

//! Stdio connectors against small shell-script MCP servers.

use askr_config::{compose, ConfigSource, TransportKind};
use askr_core::AskrError;
use askr_mcp::transport::StdioTransport;
use askr_mcp::{
    McpConnector, ServerLifecycleManager, ServerStatus, ToolCatalog, ToolDispatcher,
    TransportConnector,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Answers the handshake, lists `echo` and `hang`, never answers `hang`.
const FAKE_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9][0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"fake","version":"0.1"}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo","description":"Echo back"},{"name":"hang"},{"name":"fail"}]}}\n' "$id" ;;
    *'"name":"hang"'*)
      : ;;
    *'"name":"fail"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"bad input"}],"isError":true}}\n' "$id" ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"pong from %s"}]}}\n' "$id" "$SERVER_LABEL" ;;
  esac
done
"#;

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

fn connector(script: &Path) -> McpConnector<StdioTransport> {
    McpConnector::new(
        "fake",
        TransportKind::Stdio,
        StdioTransport::new(
            "fake",
            "sh",
            vec![script.display().to_string()],
            None,
            BTreeMap::from([("SERVER_LABEL".to_string(), "fake".to_string())]),
        ),
    )
}

fn process_exists(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[tokio::test]
async fn handshake_lists_and_calls_tools() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "server.sh", FAKE_SERVER);
    let conn = connector(&script);

    conn.connect(Duration::from_secs(5)).await.unwrap();
    assert!(conn.is_healthy());

    let tools = conn.list_tools(Duration::from_secs(5)).await.unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["echo", "hang", "fail"]);

    let out = conn
        .call_tool("echo", serde_json::json!({"text": "ping"}), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(out, "pong from fake");

    conn.close().await;
    assert!(!conn.is_healthy());
}

#[tokio::test]
async fn error_payload_is_tool_invocation_error() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "server.sh", FAKE_SERVER);
    let conn = connector(&script);
    conn.connect(Duration::from_secs(5)).await.unwrap();

    let err = conn
        .call_tool("fail", serde_json::json!({}), Duration::from_secs(5))
        .await
        .unwrap_err();
    match err {
        AskrError::ToolInvocation { tool, message } => {
            assert_eq!(tool, "fail");
            assert_eq!(message, "bad input");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(conn.is_healthy());
    conn.close().await;
}

#[tokio::test]
async fn unresponsive_call_times_out_and_close_terminates_process() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "server.sh", FAKE_SERVER);
    let conn = connector(&script);
    conn.connect(Duration::from_secs(5)).await.unwrap();
    let pid = conn.transport().pid().await.unwrap();

    let timeout = Duration::from_millis(300);
    let started = Instant::now();
    let err = conn
        .call_tool("hang", serde_json::json!({}), timeout)
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, AskrError::ToolInvocation { .. }));
    assert!(err.to_string().contains("timed out"), "{err}");
    assert!(elapsed >= timeout);
    assert!(elapsed < timeout + Duration::from_secs(2), "took {elapsed:?}");
    // The process is still alive, so the connector stays usable.
    assert!(conn.is_healthy());

    conn.close().await;
    assert!(!process_exists(pid));
}

#[tokio::test]
async fn close_kills_server_that_ignores_eof() {
    let dir = tempfile::tempdir().unwrap();
    let stubborn = format!("{FAKE_SERVER}\nexec sleep 30\n");
    let script = write_script(dir.path(), "stubborn.sh", &stubborn);
    let conn = connector(&script);
    conn.connect(Duration::from_secs(5)).await.unwrap();
    let pid = conn.transport().pid().await.unwrap();

    let started = Instant::now();
    conn.close().await;
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!process_exists(pid));
}

#[tokio::test]
async fn silent_server_fails_connect_within_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "silent.sh", "exec sleep 30\n");
    let conn = connector(&script);

    let started = Instant::now();
    let err = conn.connect(Duration::from_millis(300)).await.unwrap_err();
    assert!(matches!(err, AskrError::Connection { .. }), "{err}");
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn exited_server_marks_connector_unhealthy() {
    let dir = tempfile::tempdir().unwrap();
    let once = FAKE_SERVER.replace(
        "*'\"method\":\"tools/call\"'*)",
        "*'\"method\":\"tools/call\"'*)\n      exit 0 ;;\n    never)",
    );
    let script = write_script(dir.path(), "once.sh", &once);
    let conn = connector(&script);
    conn.connect(Duration::from_secs(5)).await.unwrap();

    let err = conn
        .call_tool("echo", serde_json::json!({}), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, AskrError::ToolInvocation { .. }));
    assert!(!conn.is_healthy());

    let again = conn
        .call_tool("echo", serde_json::json!({}), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(again.to_string().contains("unavailable"), "{again}");
    conn.close().await;
}

#[tokio::test]
async fn manager_isolates_failed_server_and_builds_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "server.sh", FAKE_SERVER);
    let yaml = format!(
        r#"
agent:
  instructions: test
llm:
  model: ollama:test
mcp:
  first:
    command: [sh, "{script}"]
    env: {{SERVER_LABEL: first}}
  broken:
    command: [/nonexistent/askr-server]
  second:
    command: [sh, "{script}"]
    env: {{SERVER_LABEL: second}}
    tool_prefix: two
"#,
        script = script.display()
    );
    let config = compose(&[ConfigSource::inline("test", yaml)]).unwrap();

    let mut manager = ServerLifecycleManager::new();
    manager.start(&config).await;
    assert_eq!(manager.get("first").unwrap().status(), ServerStatus::Ready);
    assert_eq!(manager.get("broken").unwrap().status(), ServerStatus::Failed);
    assert_eq!(manager.get("second").unwrap().status(), ServerStatus::Ready);

    let catalog = ToolCatalog::build(manager.servers());
    let names: Vec<&str> = catalog.tools().iter().map(|t| t.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["echo", "hang", "fail", "two.echo", "two.hang", "two.fail"]
    );

    let route = catalog.route("two.echo").unwrap();
    let out = manager
        .call_tool(&route.server, &route.raw_name, serde_json::json!({}))
        .await
        .unwrap();
    assert_eq!(out, "pong from second");

    manager.stop().await;
    assert!(manager
        .servers()
        .iter()
        .all(|s| s.status() == ServerStatus::Closed));
}

#[tokio::test]
async fn call_to_server_that_stops_reading_stdin_times_out() {
    let dir = tempfile::tempdir().unwrap();
    // Completes the handshake, then never reads stdin again.
    let deaf = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9][0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}}}}\n' "$id" ;;
    *'"method":"notifications/initialized"'*)
      exec sleep 1000 ;;
  esac
done
"#;
    let script = write_script(dir.path(), "deaf.sh", deaf);
    let conn = connector(&script);
    conn.connect(Duration::from_secs(5)).await.unwrap();
    let pid = conn.transport().pid().await.unwrap();

    // Far larger than a pipe buffer, so the write itself blocks.
    let payload = "x".repeat(512 * 1024);
    let timeout = Duration::from_millis(300);
    let started = Instant::now();
    let err = tokio::time::timeout(
        Duration::from_secs(5),
        conn.call_tool("echo", serde_json::json!({ "data": payload }), timeout),
    )
    .await
    .expect("call_tool must honor its own timeout")
    .unwrap_err();
    assert!(err.to_string().contains("timed out"), "{err}");
    assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());
    // A half-written request leaves the pipe unusable.
    assert!(!conn.is_healthy());

    let started = Instant::now();
    tokio::time::timeout(Duration::from_secs(10), conn.close())
        .await
        .expect("close must not wait on a blocked writer");
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!process_exists(pid));
}

#[tokio::test]
async fn server_ping_with_colliding_id_is_answered_not_routed() {
    let dir = tempfile::tempdir().unwrap();
    // Before answering tools/call, the server pings the client reusing the
    // call's id and only replies once the ping was answered.
    let chatty = FAKE_SERVER.replace(
        "*'\"method\":\"tools/call\"'*)",
        r#"*'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","method":"notifications/message","params":{"level":"info","data":"working"}}\n'
      printf '{"jsonrpc":"2.0","id":%s,"method":"ping"}\n' "$id"
      IFS= read -r reply
      case "$reply" in
        *'"result":{}'*)
          printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"pong after ping"}]}}\n' "$id" ;;
        *)
          printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"ping unanswered"}],"isError":true}}\n' "$id" ;;
      esac ;;
    never)"#,
    );
    let script = write_script(dir.path(), "chatty.sh", &chatty);
    let conn = connector(&script);
    conn.connect(Duration::from_secs(5)).await.unwrap();

    let out = conn
        .call_tool("echo", serde_json::json!({}), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(out, "pong after ping");
    assert!(conn.is_healthy());
    conn.close().await;
}
