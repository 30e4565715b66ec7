use askr_core::{Message, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The ordered turns of one agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session id, shared by every turn.
    pub id: Uuid,
    /// Agent name from the configuration.
    pub agent: String,
    /// Pipeline step this session belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    /// Turns in conversation order.
    pub messages: Vec<Message>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last appended turn.
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// An empty session for `agent`.
    pub fn new(agent: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            agent: agent.into(),
            step: None,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Tag the session with a pipeline step name.
    pub fn for_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    /// Append a turn.
    pub fn add_message(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    /// Number of turns.
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Shrink the history before it is saved. With `drop_tool_turns`, tool
    /// requests and tool results are removed. A non-zero `max_turns` keeps
    /// only the newest turns, starting at a user turn so a kept tool result
    /// never loses the request it answers.
    pub fn compact(&mut self, drop_tool_turns: bool, max_turns: usize) {
        if drop_tool_turns {
            self.messages
                .retain(|m| m.role != Role::Tool && m.tool_calls.is_empty());
        }
        if max_turns > 0 && self.messages.len() > max_turns {
            let mut start = self.messages.len() - max_turns;
            while start < self.messages.len() && self.messages[start].role != Role::User {
                start += 1;
            }
            self.messages.drain(..start);
        }
    }

    /// Text of the final assistant turn that did not request tools.
    pub fn final_output(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && m.tool_calls.is_empty())
            .map(|m| m.content.as_str())
    }

    /// Name of the tool requested under `call_id`, searching backwards.
    pub fn tool_name_for(&self, call_id: &str) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .flat_map(|m| m.tool_calls.iter())
            .find(|c| c.id == call_id)
            .map(|c| c.name.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use askr_core::{ToolCall, ToolResult};

    #[test]
    fn test_final_output_skips_tool_requests() {
        let mut session = Session::new("askr");
        let sid = session.id;
        session.add_message(Message::user("q", sid));
        session.add_message(Message::assistant("draft", sid));
        session.add_message(Message::tool_request(
            "",
            vec![ToolCall {
                id: "c1".into(),
                name: "fs.read".into(),
                arguments: serde_json::json!({}),
            }],
            sid,
        ));
        assert_eq!(session.final_output(), Some("draft"));

        session.add_message(Message::tool_result(&ToolResult::success("c1", "data"), sid));
        session.add_message(Message::assistant("answer", sid));
        assert_eq!(session.final_output(), Some("answer"));
        assert_eq!(session.message_count(), 5);
    }

    #[test]
    fn test_tool_name_lookup() {
        let mut session = Session::new("askr").for_step("research");
        let sid = session.id;
        session.add_message(Message::tool_request(
            "",
            vec![ToolCall {
                id: "c9".into(),
                name: "web.search".into(),
                arguments: serde_json::json!({"q": "rust"}),
            }],
            sid,
        ));
        assert_eq!(session.tool_name_for("c9"), Some("web.search"));
        assert_eq!(session.tool_name_for("missing"), None);
        assert_eq!(session.step.as_deref(), Some("research"));
    }

    fn exchange(session: &mut Session, question: &str, with_tool: bool) {
        let sid = session.id;
        session.add_message(Message::user(question, sid));
        if with_tool {
            session.add_message(Message::tool_request(
                "",
                vec![ToolCall {
                    id: format!("call-{question}"),
                    name: "fs.read".into(),
                    arguments: serde_json::json!({}),
                }],
                sid,
            ));
            session.add_message(Message::tool_result(
                &ToolResult::success(format!("call-{question}"), "data"),
                sid,
            ));
        }
        session.add_message(Message::assistant(format!("answer to {question}"), sid));
    }

    #[test]
    fn test_compact_drops_tool_traffic() {
        let mut session = Session::new("askr");
        exchange(&mut session, "q1", true);
        exchange(&mut session, "q2", false);
        session.compact(true, 0);
        let roles: Vec<Role> = session.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
        );
    }

    #[test]
    fn test_compact_limit_starts_at_a_user_turn() {
        let mut session = Session::new("askr");
        exchange(&mut session, "q1", false);
        exchange(&mut session, "q2", true);
        exchange(&mut session, "q3", false);
        // The newest 5 turns would begin with q2's tool result.
        session.compact(false, 5);
        assert_eq!(session.messages[0].content, "q3");
        assert_eq!(session.message_count(), 2);

        let mut untouched = Session::new("askr");
        exchange(&mut untouched, "q1", true);
        untouched.compact(false, 0);
        assert_eq!(untouched.message_count(), 4);
    }

    #[test]
    fn test_empty_session_has_no_output() {
        assert!(Session::new("askr").final_output().is_none());
    }
}
