//! The agent side of askr: model adapters, the tool-call loop and the driver
//! that wires configuration, tool servers and transcripts into one session.

/// Provider HTTP backends.
pub mod backends;
/// Session driver: servers up, run, servers down.
pub mod driver;
/// Model adapter contract and provider dispatch.
pub mod llm;
/// Scripted model for tests and dry runs.
pub mod mock;
/// The agent state machine.
pub mod runtime;

pub use driver::{HttpModelFactory, ModelFactory, ServerSummary, SessionDriver, SessionReport};
pub use llm::{LlmClient, LlmResponse, ModelAdapter};
pub use mock::ScriptedModel;
pub use runtime::{AgentRuntime, RuntimeState};
