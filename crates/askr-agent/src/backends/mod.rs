/// Anthropic messages API.
pub mod anthropic;
/// OpenAI-compatible chat completions.
pub mod openai;

use askr_config::ModelDescriptor;
use askr_core::{AskrError, AskrResult};
use askr_mcp::ToolDescriptor;
use std::collections::HashMap;

const MAX_WIRE_NAME: usize = 64;

/// Two-way mapping between catalog names and API-safe function names.
///
/// Provider APIs accept only `[A-Za-z0-9_-]{1,64}`, while catalog names may
/// carry a `prefix.` namespace. Every other character becomes `_`; clashes
/// after sanitising get a numeric suffix.
#[derive(Debug, Default)]
pub struct ToolNames {
    to_wire: HashMap<String, String>,
    to_visible: HashMap<String, String>,
}

impl ToolNames {
    /// Build the mapping for `tools` in catalog order.
    pub fn new(tools: &[ToolDescriptor]) -> Self {
        let mut names = Self::default();
        for tool in tools {
            names.register(&tool.name);
        }
        names
    }

    fn register(&mut self, visible: &str) -> String {
        if let Some(wire) = self.to_wire.get(visible) {
            return wire.clone();
        }
        let base = sanitize(visible);
        let mut wire = base.clone();
        let mut n = 2;
        while self.to_visible.contains_key(&wire) {
            let suffix = format!("_{n}");
            let keep = base.len().min(MAX_WIRE_NAME - suffix.len());
            wire = format!("{}{suffix}", &base[..keep]);
            n += 1;
        }
        self.to_wire.insert(visible.to_string(), wire.clone());
        self.to_visible.insert(wire.clone(), visible.to_string());
        wire
    }

    /// API name for a catalog name. Names outside the catalog (replayed
    /// history) are sanitised on the fly.
    pub fn wire(&self, visible: &str) -> String {
        self.to_wire
            .get(visible)
            .cloned()
            .unwrap_or_else(|| sanitize(visible))
    }

    /// Catalog name for an API name; unknown names pass through unchanged.
    pub fn visible(&self, wire: &str) -> String {
        self.to_visible
            .get(wire)
            .cloned()
            .unwrap_or_else(|| wire.to_string())
    }
}

fn sanitize(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_WIRE_NAME)
        .collect();
    if out.is_empty() {
        out.push('_');
    }
    out
}

/// HTTP client honouring `llm.timeout`.
pub(crate) fn http_client(descriptor: &ModelDescriptor) -> AskrResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = descriptor.timeout {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .map_err(|e| AskrError::Llm(format!("cannot build HTTP client: {e}")))
}

/// Send a JSON request and return the decoded body of a 2xx response.
pub(crate) async fn send_json(
    provider: &str,
    request: reqwest::RequestBuilder,
    body: &serde_json::Value,
) -> AskrResult<serde_json::Value> {
    let resp = request
        .json(body)
        .send()
        .await
        .map_err(|e| AskrError::Llm(format!("{provider} request failed: {e}")))?;

    let status = resp.status();
    let text = resp
        .text()
        .await
        .map_err(|e| AskrError::Llm(format!("{provider} response unreadable: {e}")))?;

    if !status.is_success() {
        return Err(AskrError::Llm(format!("{provider} API error {status}: {text}")));
    }

    serde_json::from_str(&text)
        .map_err(|e| AskrError::Llm(format!("{provider} returned invalid JSON: {e}")))
}
