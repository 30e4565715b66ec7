//! Conversation state of one agent run, its saved history and its on-disk
//! transcript.

/// Conversation history persisted between runs.
pub mod history;
/// Ordered turns of one run.
pub mod session;
/// JSONL transcript persistence.
pub mod transcript;

pub use history::SessionFile;
pub use session::Session;
pub use transcript::{FileTranscriptStore, TranscriptEntry, TranscriptEvent, TranscriptStore};
