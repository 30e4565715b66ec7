//! Core types and error definitions shared by every askr crate.
//!
//! # Main types
//!
//! - [`AskrError`]: Unified error enum; each variant is one failure class of
//!   the runtime (configuration, connection, tool invocation, model, ...).
//! - [`AskrResult`]: Convenience alias for `Result<T, AskrError>`.
//! - [`Role`] / [`Message`]: One turn of an agent conversation.
//! - [`ToolCall`]: A tool invocation requested by the model.
//! - [`ToolResult`]: The outcome of a tool call, tagged with its call id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Error types ---

/// Top-level error type for askr.
#[derive(Debug, thiserror::Error)]
pub enum AskrError {
    /// A configuration document is unreadable, malformed or incomplete.
    #[error("Config error: {0}")]
    Config(String),

    /// One tool server could not be reached or failed its handshake.
    #[error("Connection error [{server}]: {message}")]
    Connection {
        /// Name of the server entry in the merged configuration.
        server: String,
        /// Human readable cause.
        message: String,
    },

    /// A tool call timed out or the server answered with an error payload.
    #[error("Tool invocation error [{tool}]: {message}")]
    ToolInvocation {
        /// Tool name as seen by the model.
        tool: String,
        /// Human readable cause.
        message: String,
    },

    /// The agent loop hit its iteration cap before the model produced an answer.
    #[error("Iteration limit of {limit} model requests exceeded")]
    LimitExceeded {
        /// The configured cap.
        limit: u32,
    },

    /// The model adapter itself failed (transport, HTTP status, bad payload).
    #[error("LLM error: {0}")]
    Llm(String),

    /// The run was cancelled by a deadline or an external interrupt.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// A pipeline step failed fatally.
    #[error("Pipeline step '{step}' failed: {source}")]
    Pipeline {
        /// Name of the failing step.
        step: String,
        /// The underlying fatal error.
        #[source]
        source: Box<AskrError>,
    },

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AskrError {
    /// Shorthand for a [`AskrError::Connection`].
    pub fn connection(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            server: server.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a [`AskrError::ToolInvocation`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolInvocation {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Whether this error terminates the current session.
    ///
    /// Connection and tool invocation errors are isolated: the session keeps
    /// running in degraded mode.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            AskrError::Connection { .. } | AskrError::ToolInvocation { .. }
        )
    }
}

/// A convenience `Result` alias using [`AskrError`].
pub type AskrResult<T> = Result<T, AskrError>;

// --- Message types ---

/// The role of the participant that authored a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The operator's prompt.
    User,
    /// The model.
    Assistant,
    /// A system-level instruction.
    System,
    /// Output produced by a tool invocation.
    Tool,
}

/// A single turn within an agent conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for this message.
    pub id: Uuid,
    /// The role of the message author.
    pub role: Role,
    /// The textual content of the message.
    pub content: String,
    /// Tool calls requested by an assistant turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For tool turns: the id of the call this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// For tool turns: whether the call failed.
    #[serde(default)]
    pub is_error: bool,
    /// The session this message belongs to.
    pub session_id: Uuid,
    /// UTC timestamp of when the message was created.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Creates a new message with the given role, content, and session ID.
    pub fn new(role: Role, content: impl Into<String>, session_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            is_error: false,
            session_id,
            timestamp: Utc::now(),
        }
    }

    /// Creates a new message with [`Role::User`].
    pub fn user(content: impl Into<String>, session_id: Uuid) -> Self {
        Self::new(Role::User, content, session_id)
    }

    /// Creates a new message with [`Role::Assistant`].
    pub fn assistant(content: impl Into<String>, session_id: Uuid) -> Self {
        Self::new(Role::Assistant, content, session_id)
    }

    /// Creates an assistant turn that requests one or more tool calls.
    pub fn tool_request(
        content: impl Into<String>,
        tool_calls: Vec<ToolCall>,
        session_id: Uuid,
    ) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Assistant, content, session_id)
        }
    }

    /// Creates a [`Role::Tool`] turn answering the call in `result`.
    pub fn tool_result(result: &ToolResult, session_id: Uuid) -> Self {
        Self {
            tool_call_id: Some(result.call_id.clone()),
            is_error: result.is_error,
            ..Self::new(Role::Tool, result.content.clone(), session_id)
        }
    }
}

// --- Tool types ---

/// A request from the model to invoke a specific tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier assigned by the model for this call.
    pub id: String,
    /// Visible (catalog) name of the tool to invoke.
    pub name: String,
    /// JSON arguments to pass to the tool.
    pub arguments: serde_json::Value,
}

/// The result returned after executing a [`ToolCall`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The ID of the [`ToolCall`] this result corresponds to.
    pub call_id: String,
    /// The textual output produced by the tool.
    pub content: String,
    /// Whether the tool execution ended in an error.
    pub is_error: bool,
}

impl ToolResult {
    /// Creates a successful tool result.
    pub fn success(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    /// Creates an error tool result.
    pub fn error(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_result_turn_keeps_call_id() {
        let session_id = Uuid::new_v4();
        let result = ToolResult::error("call_7", "boom");
        let msg = Message::tool_result(&result, session_id);
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_7"));
        assert!(msg.is_error);
        assert_eq!(msg.content, "boom");
    }

    #[test]
    fn test_message_serialization_skips_empty_tool_fields() {
        let msg = Message::user("hi", Uuid::new_v4());
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("tool_calls").is_none());
        assert!(json.get("tool_call_id").is_none());
        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back.role, Role::User);
    }

    #[test]
    fn test_fatal_classification() {
        assert!(!AskrError::connection("fs", "spawn failed").is_fatal());
        assert!(!AskrError::tool("search", "timeout").is_fatal());
        assert!(AskrError::LimitExceeded { limit: 3 }.is_fatal());
        assert!(AskrError::Config("bad".into()).is_fatal());
    }

    #[test]
    fn test_pipeline_error_display_names_step() {
        let err = AskrError::Pipeline {
            step: "outline".into(),
            source: Box::new(AskrError::Llm("503".into())),
        };
        let text = err.to_string();
        assert!(text.contains("outline"));
        assert!(text.contains("503"));
    }
}
