use crate::session::Session;
use askr_core::{AskrResult, Message, Role};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// TranscriptEvent
// ---------------------------------------------------------------------------

/// One recorded event of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TranscriptEvent {
    /// System instructions given to the model.
    SystemMessage {
        /// Instruction text.
        content: String,
    },
    /// The prompt.
    UserMessage {
        /// Prompt text.
        content: String,
    },
    /// Text produced by the model.
    AssistantMessage {
        /// Model output.
        content: String,
    },
    /// A tool call requested by the model.
    ToolCallRequest {
        /// Call id assigned by the model.
        call_id: String,
        /// Visible tool name.
        tool_name: String,
        /// Call arguments.
        arguments: serde_json::Value,
    },
    /// The outcome of a tool call.
    ToolCallResult {
        /// Call id this result answers.
        call_id: String,
        /// Visible tool name.
        tool_name: String,
        /// Output or error text.
        content: String,
        /// Whether the call failed.
        is_error: bool,
    },
    /// How the session ended.
    Outcome {
        /// `completed` or `failed`.
        status: String,
        /// Error text for failed sessions.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// TranscriptEntry
// ---------------------------------------------------------------------------

/// One JSONL line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// Session the entry belongs to.
    pub session_id: Uuid,
    /// Agent name.
    pub agent: String,
    /// Pipeline step, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    /// Position within the session.
    pub turn: u32,
    /// When the underlying turn was created.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub event: TranscriptEvent,
}

impl TranscriptEntry {
    /// Flatten a session into entries, followed by its outcome.
    pub fn from_session(
        session: &Session,
        instructions: Option<&str>,
        error: Option<&str>,
    ) -> Vec<Self> {
        let mut events: Vec<(DateTime<Utc>, TranscriptEvent)> = Vec::new();
        if let Some(instructions) = instructions {
            events.push((
                session.created_at,
                TranscriptEvent::SystemMessage {
                    content: instructions.to_string(),
                },
            ));
        }
        for message in &session.messages {
            events.extend(message_events(session, message).into_iter().map(|e| (message.timestamp, e)));
        }
        events.push((
            session.updated_at,
            TranscriptEvent::Outcome {
                status: if error.is_some() { "failed" } else { "completed" }.to_string(),
                error: error.map(str::to_string),
            },
        ));

        events
            .into_iter()
            .enumerate()
            .map(|(turn, (timestamp, event))| TranscriptEntry {
                session_id: session.id,
                agent: session.agent.clone(),
                step: session.step.clone(),
                turn: turn as u32,
                timestamp,
                event,
            })
            .collect()
    }
}

fn message_events(session: &Session, message: &Message) -> Vec<TranscriptEvent> {
    match message.role {
        Role::System => vec![TranscriptEvent::SystemMessage {
            content: message.content.clone(),
        }],
        Role::User => vec![TranscriptEvent::UserMessage {
            content: message.content.clone(),
        }],
        Role::Assistant => {
            let mut events = Vec::new();
            if !message.content.is_empty() || message.tool_calls.is_empty() {
                events.push(TranscriptEvent::AssistantMessage {
                    content: message.content.clone(),
                });
            }
            events.extend(message.tool_calls.iter().map(|call| {
                TranscriptEvent::ToolCallRequest {
                    call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    arguments: call.arguments.clone(),
                }
            }));
            events
        }
        Role::Tool => {
            let call_id = message.tool_call_id.clone().unwrap_or_default();
            let tool_name = session.tool_name_for(&call_id).unwrap_or_default().to_string();
            vec![TranscriptEvent::ToolCallResult {
                call_id,
                tool_name,
                content: message.content.clone(),
                is_error: message.is_error,
            }]
        }
    }
}

// ---------------------------------------------------------------------------
// TranscriptStore trait
// ---------------------------------------------------------------------------

/// Append-only sink for transcript entries.
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    /// Append one entry.
    async fn append(&self, entry: TranscriptEntry) -> AskrResult<()>;

    /// Read back every entry of `session_id`, ordered by turn.
    async fn read(&self, session_id: Uuid) -> AskrResult<Vec<TranscriptEntry>>;

    /// Append a whole session and its outcome.
    async fn record(
        &self,
        session: &Session,
        instructions: Option<&str>,
        error: Option<&str>,
    ) -> AskrResult<()> {
        for entry in TranscriptEntry::from_session(session, instructions, error) {
            self.append(entry).await?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileTranscriptStore
// ---------------------------------------------------------------------------

/// All sessions of a run appended to one JSONL file.
pub struct FileTranscriptStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileTranscriptStore {
    /// Use `path`, creating its parent directory if needed.
    pub async fn new(path: impl Into<PathBuf>) -> AskrResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// The transcript file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TranscriptStore for FileTranscriptStore {
    async fn append(&self, entry: TranscriptEntry) -> AskrResult<()> {
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        debug!(path = %self.path.display(), turn = entry.turn, "transcript entry appended");
        Ok(())
    }

    async fn read(&self, session_id: Uuid) -> AskrResult<Vec<TranscriptEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = tokio::fs::read_to_string(&self.path).await?;
        let mut entries = Vec::new();
        for line in data.lines().filter(|l| !l.trim().is_empty()) {
            let entry: TranscriptEntry = serde_json::from_str(line)?;
            if entry.session_id == session_id {
                entries.push(entry);
            }
        }
        entries.sort_by_key(|e| e.turn);
        Ok(entries)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
