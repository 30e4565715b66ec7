use crate::manager::{ConnectedServer, ServerStatus};
use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

/// A tool as the model sees it, with its route back to the owning server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    /// Server that owns the tool.
    pub server: String,
    /// Name the server knows the tool by.
    pub raw_name: String,
    /// Name offered to the model: `prefix.raw_name`, or `raw_name`.
    pub name: String,
    /// Human readable description.
    pub description: String,
    /// JSON schema of the arguments.
    pub input_schema: serde_json::Value,
}

/// The collision-free set of tools visible to one session. Read-only once
/// built.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
    warnings: Vec<String>,
}

impl ToolCatalog {
    /// Aggregate the tools of every `Ready` server.
    ///
    /// Servers are visited in the order given (declaration order when taken
    /// from the manager). When two tools share a visible name the first one
    /// registered wins and the later one is dropped with a warning.
    pub fn build(servers: &[ConnectedServer]) -> Self {
        let mut catalog = Self::default();
        for server in servers.iter().filter(|s| s.status() == ServerStatus::Ready) {
            let prefix = server.config().tool_prefix.as_deref();
            for tool in server.tools() {
                catalog.insert(ToolDescriptor {
                    server: server.name().to_string(),
                    raw_name: tool.name.clone(),
                    name: visible_name(prefix, &tool.name),
                    description: tool.description.clone(),
                    input_schema: tool.input_schema.clone(),
                });
            }
        }
        catalog
    }

    /// Register a descriptor unless its visible name is taken. Returns
    /// whether it was added.
    pub fn insert(&mut self, tool: ToolDescriptor) -> bool {
        if let Some(&existing) = self.index.get(&tool.name) {
            let owner = &self.tools[existing].server;
            let message = format!(
                "tool '{}' from server '{}' dropped: name already provided by server '{}'",
                tool.name, tool.server, owner
            );
            warn!(
                tool = %tool.name,
                server = %tool.server,
                owner = %owner,
                "duplicate tool name, keeping the first registration"
            );
            self.warnings.push(message);
            return false;
        }
        self.index.insert(tool.name.clone(), self.tools.len());
        self.tools.push(tool);
        true
    }

    /// Resolve a visible name to its descriptor.
    pub fn route(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    /// All descriptors in registration order.
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Collision warnings recorded while building.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Number of visible tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tool is visible.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// `prefix.raw` when a prefix is configured, else `raw`.
pub fn visible_name(prefix: Option<&str>, raw: &str) -> String {
    match prefix {
        Some(prefix) => format!("{prefix}.{raw}"),
        None => raw.to_string(),
    }
}
