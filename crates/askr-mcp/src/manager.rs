use crate::connector::{ConnectorFactory, McpConnectorFactory, TransportConnector};
use crate::protocol::McpToolDef;
use askr_config::{MergedConfig, ServerConfig};
use askr_core::{AskrError, AskrResult};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Default cap on concurrent connection attempts.
pub const DEFAULT_STARTUP_PARALLELISM: usize = 4;

/// Lifecycle state of a managed server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    /// Connection attempt in progress.
    Starting,
    /// Handshake done and tools discovered.
    Ready,
    /// Startup failed; see `last_error`.
    Failed,
    /// Torn down by [`ServerLifecycleManager::stop`].
    Closed,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ServerStatus::Starting => "starting",
            ServerStatus::Ready => "ready",
            ServerStatus::Failed => "failed",
            ServerStatus::Closed => "closed",
        })
    }
}

/// A server entry owned by the manager.
pub struct ConnectedServer {
    config: ServerConfig,
    status: ServerStatus,
    tools: Vec<McpToolDef>,
    last_error: Option<String>,
    connector: Option<Arc<dyn TransportConnector>>,
}

impl ConnectedServer {
    /// Server name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The server's configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Current status.
    pub fn status(&self) -> ServerStatus {
        self.status
    }

    /// Tools discovered at startup. Empty unless `Ready`.
    pub fn tools(&self) -> &[McpToolDef] {
        &self.tools
    }

    /// Why startup failed.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

impl fmt::Debug for ConnectedServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectedServer")
            .field("name", &self.config.name)
            .field("status", &self.status)
            .field("tools", &self.tools.len())
            .field("last_error", &self.last_error)
            .finish()
    }
}

/// Routes a tool call to the server that owns the tool.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Call `tool` (the server's raw name) on `server`.
    async fn call_tool(&self, server: &str, tool: &str, arguments: Value) -> AskrResult<String>;
}

/// Owns every tool-server connection of one session.
pub struct ServerLifecycleManager {
    factory: Arc<dyn ConnectorFactory>,
    max_parallel: usize,
    servers: Vec<ConnectedServer>,
}

impl ServerLifecycleManager {
    /// A manager using the real transports.
    pub fn new() -> Self {
        Self::with_factory(Arc::new(McpConnectorFactory::default()))
    }

    /// A manager building connectors through `factory`.
    pub fn with_factory(factory: Arc<dyn ConnectorFactory>) -> Self {
        Self {
            factory,
            max_parallel: DEFAULT_STARTUP_PARALLELISM,
            servers: Vec::new(),
        }
    }

    /// Cap concurrent connection attempts (minimum 1).
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Start every enabled server of `config`.
    ///
    /// Entries are registered before any connection is attempted, so a
    /// [`stop`](Self::stop) after this future is dropped still reaches every
    /// connector. A failing server is recorded as `Failed` and never aborts
    /// the others. Starting again first stops and replaces the previous set.
    pub async fn start(&mut self, config: &MergedConfig) -> &[ConnectedServer] {
        self.stop().await;
        self.servers.clear();
        for server in config.enabled_servers() {
            let mut entry = ConnectedServer {
                config: server.clone(),
                status: ServerStatus::Starting,
                tools: Vec::new(),
                last_error: None,
                connector: None,
            };
            match self.factory.create(server) {
                Ok(connector) => entry.connector = Some(connector),
                Err(e) => {
                    warn!(server = %server.name, error = %e, "MCP server could not be configured");
                    entry.status = ServerStatus::Failed;
                    entry.last_error = Some(e.to_string());
                }
            }
            self.servers.push(entry);
        }

        let attempts: Vec<_> = self
            .servers
            .iter()
            .enumerate()
            .filter(|(_, s)| s.status == ServerStatus::Starting)
            .filter_map(|(idx, s)| {
                s.connector
                    .clone()
                    .map(|c| (idx, c, s.config.connect_timeout))
            })
            .collect();

        info!(
            servers = attempts.len(),
            parallelism = self.max_parallel,
            "starting MCP servers"
        );

        let outcomes: Vec<(usize, AskrResult<Vec<McpToolDef>>)> = stream::iter(attempts)
            .map(|(idx, connector, timeout)| async move {
                let started = tokio::time::Instant::now();
                let outcome = match connector.connect(timeout).await {
                    Ok(()) => {
                        let remaining = timeout.saturating_sub(started.elapsed());
                        connector.list_tools(remaining.max(timeout / 10)).await
                    }
                    Err(e) => Err(e),
                };
                (idx, outcome)
            })
            .buffer_unordered(self.max_parallel)
            .collect()
            .await;

        for (idx, outcome) in outcomes {
            let Some(entry) = self.servers.get_mut(idx) else {
                continue;
            };
            match outcome {
                Ok(tools) => {
                    info!(
                        server = %entry.config.name,
                        tools = tools.len(),
                        "MCP server ready"
                    );
                    entry.tools = tools;
                    entry.status = ServerStatus::Ready;
                }
                Err(e) => {
                    warn!(
                        server = %entry.config.name,
                        error = %e,
                        "MCP server failed to start, continuing without it"
                    );
                    entry.status = ServerStatus::Failed;
                    entry.last_error = Some(e.to_string());
                    if let Some(connector) = &entry.connector {
                        connector.close().await;
                    }
                }
            }
        }

        &self.servers
    }

    /// Close every entry regardless of status. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        let connectors: Vec<_> = self
            .servers
            .iter_mut()
            .filter(|s| s.status != ServerStatus::Closed)
            .filter_map(|s| {
                s.status = ServerStatus::Closed;
                s.connector.take()
            })
            .collect();
        if connectors.is_empty() {
            return;
        }
        futures_util::future::join_all(connectors.iter().map(|c| c.close())).await;
        info!(servers = connectors.len(), "MCP servers stopped");
    }

    /// Entries in declaration order.
    pub fn servers(&self) -> &[ConnectedServer] {
        &self.servers
    }

    /// Look up an entry by name.
    pub fn get(&self, name: &str) -> Option<&ConnectedServer> {
        self.servers.iter().find(|s| s.config.name == name)
    }

    /// Number of `Ready` servers.
    pub fn ready_count(&self) -> usize {
        self.servers
            .iter()
            .filter(|s| s.status == ServerStatus::Ready)
            .count()
    }
}

impl Default for ServerLifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolDispatcher for ServerLifecycleManager {
    async fn call_tool(&self, server: &str, tool: &str, arguments: Value) -> AskrResult<String> {
        let entry = self
            .get(server)
            .ok_or_else(|| AskrError::tool(tool, format!("unknown server '{server}'")))?;
        let connector = match (&entry.connector, entry.status) {
            (Some(connector), ServerStatus::Ready) => connector,
            (_, status) => {
                return Err(AskrError::tool(
                    tool,
                    format!("server '{server}' is {status}"),
                ))
            }
        };
        connector
            .call_tool(tool, arguments, entry.config.call_timeout)
            .await
    }
}
