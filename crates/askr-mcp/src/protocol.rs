//! MCP (Model Context Protocol) JSON-RPC 2.0 message types.

use serde::{Deserialize, Serialize};

/// Protocol revision announced in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Correlation id.
    pub id: u64,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Build a request.
    pub fn new(id: u64, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification (no id, no response).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    /// Build a notification.
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol marker, not checked.
    #[allow(dead_code)]
    #[serde(default)]
    pub jsonrpc: String,
    /// Id of the request being answered; absent on notifications.
    #[serde(default)]
    pub id: Option<u64>,
    /// Success payload.
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Error payload.
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i64,
    /// Error message.
    pub message: String,
    /// Optional structured detail.
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// JSON-RPC code for an unsupported method.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// A message read from a server, classified by shape.
///
/// Servers may send their own requests (`ping`, sampling) and notifications
/// on the same channel as responses. Their ids live in a separate space from
/// ours, so only messages without a `method` are routed to waiting callers.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// Answer to one of our requests.
    Response(JsonRpcResponse),
    /// Server-initiated request expecting a reply.
    Request {
        /// Id chosen by the server, echoed back verbatim.
        id: serde_json::Value,
        /// Requested method.
        method: String,
    },
    /// Server notification.
    Notification {
        /// Notified method.
        method: String,
    },
}

#[derive(Deserialize)]
struct RawInbound {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

impl Inbound {
    /// Parse one JSON-RPC message.
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        let raw: RawInbound = serde_json::from_str(text)?;
        Ok(match (raw.method, raw.id) {
            (Some(method), Some(id)) => Inbound::Request { id, method },
            (Some(method), None) => Inbound::Notification { method },
            (None, id) => Inbound::Response(JsonRpcResponse {
                jsonrpc: "2.0".into(),
                id: id.and_then(|v| v.as_u64()),
                result: raw.result,
                error: raw.error,
            }),
        })
    }
}

/// Our reply to a server-initiated request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcReply {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// The server's request id.
    pub id: serde_json::Value,
    /// Success payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
}

impl JsonRpcReply {
    /// Answer a server request: `ping` gets an empty result, every other
    /// method is refused with [`METHOD_NOT_FOUND`].
    pub fn to_server_request(id: serde_json::Value, method: &str) -> Self {
        let (result, error) = if method == "ping" {
            (Some(serde_json::json!({})), None)
        } else {
            let error = serde_json::json!({
                "code": METHOD_NOT_FOUND,
                "message": format!("method '{method}' is not supported by this client"),
            });
            (None, Some(error))
        };
        Self {
            jsonrpc: "2.0",
            id,
            result,
            error,
        }
    }
}

/// MCP tool definition from the `tools/list` response.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct McpToolDef {
    /// Tool name as exposed by the server.
    pub name: String,
    /// Human readable description.
    #[serde(default)]
    pub description: String,
    /// JSON schema of the arguments.
    #[serde(default = "default_input_schema", rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

fn default_input_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// One page of a `tools/list` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsResult {
    /// Tools on this page.
    #[serde(default)]
    pub tools: Vec<McpToolDef>,
    /// Cursor for the next page, if any.
    #[serde(default, rename = "nextCursor")]
    pub next_cursor: Option<String>,
}

/// MCP tool call result from the `tools/call` response.
#[derive(Debug, Clone, Deserialize)]
pub struct McpToolResult {
    /// Content blocks.
    #[serde(default)]
    pub content: Vec<McpContent>,
    /// Whether the tool reported a failure.
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl McpToolResult {
    /// Flatten the content blocks into the text handed to the model.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(McpContent::render)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// MCP content block.
#[derive(Debug, Clone, Deserialize)]
pub struct McpContent {
    /// Block type (`text`, `image`, `resource`, ...).
    #[serde(rename = "type")]
    pub content_type: String,
    /// Text of a `text` block.
    #[serde(default)]
    pub text: String,
    /// MIME type of binary blocks.
    #[serde(default, rename = "mimeType")]
    pub mime_type: Option<String>,
}

impl McpContent {
    fn render(&self) -> String {
        match self.content_type.as_str() {
            "text" => self.text.clone(),
            other => match &self.mime_type {
                Some(mime) => format!("[{other} content: {mime}]"),
                None => format!("[{other} content]"),
            },
        }
    }
}

/// MCP server capabilities from the `initialize` response.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerCapabilities {
    /// Present when the server exposes tools.
    #[serde(default)]
    pub tools: Option<serde_json::Value>,
}

/// MCP initialize response.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    /// Revision chosen by the server.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Advertised capabilities.
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    /// Implementation details of the server.
    #[serde(default, rename = "serverInfo")]
    pub server_info: Option<ServerInfo>,
}

/// Name and version reported by a server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    /// Implementation name.
    pub name: String,
    /// Implementation version.
    #[serde(default)]
    pub version: String,
}

/// Parameters of the `initialize` request.
pub fn initialize_params() -> serde_json::Value {
    serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": "askr",
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_json_rpc_request_serialization() {
        let req = JsonRpcRequest::new(1, "tools/call", Some(serde_json::json!({"name": "x"})));
        let parsed: serde_json::Value = serde_json::to_value(&req).unwrap();
        assert_eq!(parsed["jsonrpc"], "2.0");
        assert_eq!(parsed["id"], 1);
        assert_eq!(parsed["method"], "tools/call");
        assert_eq!(parsed["params"]["name"], "x");
    }

    #[test]
    fn test_notification_has_no_id() {
        let note = JsonRpcNotification::new("notifications/initialized", None);
        let parsed = serde_json::to_value(&note).unwrap();
        assert!(parsed.get("id").is_none());
        assert!(parsed.get("params").is_none());
    }

    #[test]
    fn test_json_rpc_error_parse() {
        let json =
            r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32601,"message":"Method not found"}}"#;
        let resp: JsonRpcResponse = serde_json::from_str(json).unwrap();
        let err = resp.error.unwrap();
        assert_eq!(err.code, -32601);
        assert_eq!(err.message, "Method not found");
    }

    #[test]
    fn test_inbound_separates_server_requests_from_responses() {
        let ping = Inbound::parse(r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#).unwrap();
        match ping {
            Inbound::Request { id, method } => {
                assert_eq!(id, 2);
                assert_eq!(method, "ping");
            }
            other => panic!("unexpected {other:?}"),
        }

        let note =
            Inbound::parse(r#"{"jsonrpc":"2.0","method":"notifications/tools/list_changed"}"#)
                .unwrap();
        assert!(matches!(note, Inbound::Notification { .. }));

        let reply = Inbound::parse(r#"{"jsonrpc":"2.0","id":2,"result":{"ok":true}}"#).unwrap();
        match reply {
            Inbound::Response(resp) => {
                assert_eq!(resp.id, Some(2));
                assert_eq!(resp.result.unwrap()["ok"], true);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_server_request_replies() {
        let pong = serde_json::to_value(JsonRpcReply::to_server_request(
            serde_json::json!("srv-1"),
            "ping",
        ))
        .unwrap();
        assert_eq!(pong["id"], "srv-1");
        assert_eq!(pong["result"], serde_json::json!({}));
        assert!(pong.get("error").is_none());

        let refused = serde_json::to_value(JsonRpcReply::to_server_request(
            serde_json::json!(7),
            "sampling/createMessage",
        ))
        .unwrap();
        assert_eq!(refused["error"]["code"], METHOD_NOT_FOUND);
        assert!(refused.get("result").is_none());
    }

    #[test]
    fn test_tool_def_defaults_schema() {
        let tool: McpToolDef = serde_json::from_str(r#"{"name":"ping"}"#).unwrap();
        assert_eq!(tool.input_schema["type"], "object");
        assert!(tool.description.is_empty());
    }

    #[test]
    fn test_list_tools_cursor() {
        let page: ListToolsResult =
            serde_json::from_str(r#"{"tools":[{"name":"a"}],"nextCursor":"p2"}"#).unwrap();
        assert_eq!(page.tools.len(), 1);
        assert_eq!(page.next_cursor.as_deref(), Some("p2"));
    }

    #[test]
    fn test_tool_result_text_joins_blocks() {
        let json = r#"{"content":[{"type":"text","text":"line one"},{"type":"image","data":"..","mimeType":"image/png"},{"type":"text","text":"line two"}],"isError":false}"#;
        let result: McpToolResult = serde_json::from_str(json).unwrap();
        assert_eq!(
            result.text(),
            "line one\n[image content: image/png]\nline two"
        );
    }

    #[test]
    fn test_initialize_result_parse() {
        let json = r#"{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"fs","version":"1.0"}}"#;
        let result: InitializeResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.protocol_version, PROTOCOL_VERSION);
        assert!(result.capabilities.tools.is_some());
        assert_eq!(result.server_info.unwrap().name, "fs");
    }
}
