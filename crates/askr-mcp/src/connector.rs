use crate::error::RpcError;
use crate::protocol::{initialize_params, InitializeResult, ListToolsResult, McpToolDef, McpToolResult};
use crate::transport::{HttpTransport, RpcTransport, SseTransport, StdioTransport};
use askr_config::{ServerConfig, Transport, TransportKind};
use askr_core::{AskrError, AskrResult};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Url;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Uniform contract of one connection to one tool server.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Name of the server entry this connector serves.
    fn server(&self) -> &str;

    /// Transport variant.
    fn kind(&self) -> TransportKind;

    /// Open the channel and complete the MCP handshake within `timeout`.
    async fn connect(&self, timeout: Duration) -> AskrResult<()>;

    /// Fetch the server's raw tool definitions.
    async fn list_tools(&self, timeout: Duration) -> AskrResult<Vec<McpToolDef>>;

    /// Invoke `name` with `arguments`; errors are [`AskrError::ToolInvocation`].
    async fn call_tool(&self, name: &str, arguments: Value, timeout: Duration)
        -> AskrResult<String>;

    /// Release the channel. Idempotent, safe on a never-connected connector.
    async fn close(&self);

    /// False once the channel is known to be unusable.
    fn is_healthy(&self) -> bool;
}

/// MCP client logic layered over any [`RpcTransport`].
pub struct McpConnector<T> {
    server: String,
    kind: TransportKind,
    transport: T,
    healthy: AtomicBool,
    /// Bumped on every completed handshake.
    generation: AtomicU64,
    reconnect: Mutex<()>,
}

impl<T: RpcTransport> McpConnector<T> {
    /// Wrap a transport.
    pub fn new(server: impl Into<String>, kind: TransportKind, transport: T) -> Self {
        Self {
            server: server.into(),
            kind,
            transport,
            healthy: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            reconnect: Mutex::new(()),
        }
    }

    /// The wrapped transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn handshake(&self, timeout: Duration) -> Result<InitializeResult, RpcError> {
        self.transport.open().await?;
        let raw = self
            .transport
            .request("initialize", Some(initialize_params()), timeout)
            .await?;
        let init: InitializeResult = serde_json::from_value(raw)
            .map_err(|e| RpcError::Protocol(format!("invalid initialize result: {e}")))?;
        self.transport
            .notify("notifications/initialized", None)
            .await?;
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(init)
    }

    /// Re-open a broken network channel once. `seen` is the handshake
    /// generation the failed request was sent on; when another caller has
    /// already completed a newer handshake, that one is reused.
    async fn reconnect(&self, seen: u64, timeout: Duration) -> Result<(), RpcError> {
        let _guard = self.reconnect.lock().await;
        if self.generation.load(Ordering::SeqCst) != seen && self.transport.is_alive() {
            return Ok(());
        }
        warn!(server = %self.server, "MCP channel broken, reconnecting");
        self.transport.close().await;
        let outcome = tokio::time::timeout(timeout, self.handshake(timeout))
            .await
            .unwrap_or(Err(RpcError::Timeout(timeout)));
        match outcome {
            Ok(_) => {
                info!(server = %self.server, "MCP server reconnected");
                Ok(())
            }
            Err(e) => {
                self.transport.close().await;
                self.mark_unhealthy(&e);
                Err(e)
            }
        }
    }

    fn mark_unhealthy(&self, cause: &RpcError) {
        if self.healthy.swap(false, Ordering::SeqCst) {
            warn!(server = %self.server, error = %cause, "MCP connector marked unhealthy");
        }
    }

    async fn request_with_recovery(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let seen = self.generation.load(Ordering::SeqCst);
        let first = self
            .transport
            .request(method, Some(params.clone()), timeout)
            .await;
        let err = match first {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if err.is_channel_broken() && self.transport.can_reconnect() {
            self.reconnect(seen, timeout).await?;
            let retry = self.transport.request(method, Some(params), timeout).await;
            if let Err(e) = &retry {
                if e.is_channel_broken() {
                    self.mark_unhealthy(e);
                }
            }
            return retry;
        }

        if !self.transport.is_alive() {
            self.mark_unhealthy(&err);
        }
        Err(err)
    }
}

#[async_trait]
impl<T: RpcTransport + 'static> TransportConnector for McpConnector<T> {
    fn server(&self) -> &str {
        &self.server
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn connect(&self, timeout: Duration) -> AskrResult<()> {
        let outcome = tokio::time::timeout(timeout, self.handshake(timeout)).await;
        let err = match outcome {
            Ok(Ok(init)) => {
                self.healthy.store(true, Ordering::SeqCst);
                let (name, version) = init
                    .server_info
                    .map(|s| (s.name, s.version))
                    .unwrap_or_default();
                info!(
                    server = %self.server,
                    transport = %self.kind,
                    protocol = %init.protocol_version,
                    implementation = %name,
                    version = %version,
                    "MCP server initialized"
                );
                return Ok(());
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("no handshake completed within {timeout:?}"),
        };
        self.transport.close().await;
        Err(AskrError::connection(&self.server, err))
    }

    async fn list_tools(&self, timeout: Duration) -> AskrResult<Vec<McpToolDef>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = match &cursor {
                Some(c) => serde_json::json!({ "cursor": c }),
                None => serde_json::json!({}),
            };
            let raw = self
                .request_with_recovery("tools/list", params, timeout)
                .await
                .map_err(|e| AskrError::connection(&self.server, format!("tools/list: {e}")))?;
            let page: ListToolsResult = serde_json::from_value(raw).map_err(|e| {
                AskrError::connection(&self.server, format!("invalid tools/list result: {e}"))
            })?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if cursor.as_ref() != Some(&next) => cursor = Some(next),
                _ => break,
            }
        }
        debug!(server = %self.server, tools = tools.len(), "MCP tools discovered");
        Ok(tools)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> AskrResult<String> {
        if !self.is_healthy() {
            return Err(AskrError::tool(
                name,
                format!("server '{}' is unavailable", self.server),
            ));
        }
        let params = serde_json::json!({ "name": name, "arguments": arguments });
        let raw = self
            .request_with_recovery("tools/call", params, timeout)
            .await
            .map_err(|e| match e {
                RpcError::Timeout(d) => AskrError::tool(name, format!("timed out after {d:?}")),
                other => AskrError::tool(name, other.to_string()),
            })?;
        let result: McpToolResult = serde_json::from_value(raw)
            .map_err(|e| AskrError::tool(name, format!("invalid tools/call result: {e}")))?;
        if result.is_error {
            return Err(AskrError::tool(name, result.text()));
        }
        Ok(result.text())
    }

    async fn close(&self) {
        self.healthy.store(false, Ordering::SeqCst);
        self.transport.close().await;
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

/// Builds connectors for server entries. Swappable so tests can inject fakes.
pub trait ConnectorFactory: Send + Sync {
    /// Construct an unconnected connector for `config`.
    fn create(&self, config: &ServerConfig) -> AskrResult<Arc<dyn TransportConnector>>;
}

/// Factory for the real stdio, sse and http connectors.
#[derive(Clone, Default)]
pub struct McpConnectorFactory {
    client: reqwest::Client,
}

impl McpConnectorFactory {
    /// A factory sharing `client` between all network connectors.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl ConnectorFactory for McpConnectorFactory {
    fn create(&self, config: &ServerConfig) -> AskrResult<Arc<dyn TransportConnector>> {
        let name = config.name.clone();
        let kind = config.transport.kind();
        let connector: Arc<dyn TransportConnector> = match &config.transport {
            Transport::Stdio {
                program,
                args,
                cwd,
                env,
            } => Arc::new(McpConnector::new(
                &name,
                kind,
                StdioTransport::new(&name, program, args.clone(), cwd.clone(), env.clone()),
            )),
            Transport::Sse { url, headers } => Arc::new(McpConnector::new(
                &name,
                kind,
                SseTransport::new(
                    &name,
                    parse_url(&name, url)?,
                    header_map(&name, headers)?,
                    self.client.clone(),
                ),
            )),
            Transport::Http { url, headers } => Arc::new(McpConnector::new(
                &name,
                kind,
                HttpTransport::new(
                    &name,
                    parse_url(&name, url)?,
                    header_map(&name, headers)?,
                    self.client.clone(),
                ),
            )),
        };
        Ok(connector)
    }
}

fn parse_url(server: &str, url: &str) -> AskrResult<Url> {
    Url::parse(url).map_err(|e| AskrError::connection(server, format!("invalid url '{url}': {e}")))
}

fn header_map(server: &str, headers: &BTreeMap<String, String>) -> AskrResult<HeaderMap> {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| AskrError::connection(server, format!("invalid header '{key}': {e}")))?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            AskrError::connection(server, format!("invalid value for header '{key}': {e}"))
        })?;
        map.insert(name, value);
    }
    Ok(map)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_builds_each_kind() {
        let factory = McpConnectorFactory::default();
        let stdio = ServerConfig::stdio("fs", "cat", vec![]);
        assert_eq!(factory.create(&stdio).unwrap().kind(), TransportKind::Stdio);

        let mut sse = ServerConfig::stdio("web", "unused", vec![]);
        sse.transport = Transport::Sse {
            url: "http://localhost:1/sse".into(),
            headers: BTreeMap::from([("Authorization".into(), "Bearer t".into())]),
        };
        let connector = factory.create(&sse).unwrap();
        assert_eq!(connector.kind(), TransportKind::Sse);
        assert_eq!(connector.server(), "web");
        assert!(!connector.is_healthy());
    }

    #[test]
    fn test_invalid_header_is_connection_error() {
        let err = header_map("api", &BTreeMap::from([("bad header".into(), "x".into())]))
            .unwrap_err();
        assert!(matches!(err, AskrError::Connection { .. }));
    }

    #[tokio::test]
    async fn test_unhealthy_connector_fails_fast() {
        let connector = McpConnector::new(
            "fs",
            TransportKind::Stdio,
            StdioTransport::new("fs", "cat", vec![], None, BTreeMap::new()),
        );
        let err = connector
            .call_tool("read", serde_json::json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("server 'fs' is unavailable"), "{err}");
    }

    #[tokio::test]
    async fn test_spawn_failure_is_connection_error() {
        let connector = McpConnector::new(
            "ghost",
            TransportKind::Stdio,
            StdioTransport::new(
                "ghost",
                "/nonexistent/askr-mcp-server",
                vec![],
                None,
                BTreeMap::new(),
            ),
        );
        let err = connector.connect(Duration::from_secs(1)).await.unwrap_err();
        match err {
            AskrError::Connection { server, message } => {
                assert_eq!(server, "ghost");
                assert!(message.contains("failed to spawn"), "{message}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
