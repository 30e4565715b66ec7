use crate::llm::{LlmResponse, ModelAdapter};
use askr_core::{AskrError, AskrResult, Message, ToolCall, ToolResult};
use askr_mcp::{ToolCatalog, ToolDispatcher};
use askr_session::Session;
use futures_util::future::join_all;
use std::fmt;
use tracing::{debug, info, warn};

/// States of the agent loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    /// Not started.
    Idle,
    /// Waiting for the model.
    AwaitingModel,
    /// Waiting for requested tool calls.
    AwaitingTool,
    /// The model produced a final answer.
    Done,
    /// Model failure or iteration cap.
    Failed,
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuntimeState::Idle => "idle",
            RuntimeState::AwaitingModel => "awaiting_model",
            RuntimeState::AwaitingTool => "awaiting_tool",
            RuntimeState::Done => "done",
            RuntimeState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// The agent loop: prompt → model → tool calls → results → model, until the
/// model answers or the iteration cap is hit.
///
/// Tool calls of one model turn run concurrently. Each result turn carries
/// the id of the call it answers, and results are appended in request order.
pub struct AgentRuntime<'a> {
    model: &'a dyn ModelAdapter,
    catalog: &'a ToolCatalog,
    dispatcher: &'a dyn ToolDispatcher,
    instructions: String,
    max_iterations: u32,
    iterations: u32,
    state: RuntimeState,
}

impl<'a> AgentRuntime<'a> {
    /// A runtime in [`RuntimeState::Idle`].
    pub fn new(
        model: &'a dyn ModelAdapter,
        catalog: &'a ToolCatalog,
        dispatcher: &'a dyn ToolDispatcher,
        instructions: impl Into<String>,
        max_iterations: u32,
    ) -> Self {
        Self {
            model,
            catalog,
            dispatcher,
            instructions: instructions.into(),
            max_iterations,
            iterations: 0,
            state: RuntimeState::Idle,
        }
    }

    /// Current state.
    pub fn state(&self) -> RuntimeState {
        self.state
    }

    /// How many times the model has been consulted.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Run `prompt` to completion, appending every turn to `session`.
    pub async fn run(&mut self, session: &mut Session, prompt: &str) -> AskrResult<String> {
        let session_id = session.id;
        session.add_message(Message::user(prompt, session_id));
        info!(
            session_id = %session_id,
            tools = self.catalog.len(),
            max_iterations = self.max_iterations,
            "starting agent loop"
        );

        loop {
            if self.iterations >= self.max_iterations {
                self.state = RuntimeState::Failed;
                warn!(
                    session_id = %session_id,
                    limit = self.max_iterations,
                    "agent loop reached its iteration cap"
                );
                return Err(AskrError::LimitExceeded {
                    limit: self.max_iterations,
                });
            }
            self.iterations += 1;
            self.state = RuntimeState::AwaitingModel;
            debug!(session_id = %session_id, iteration = self.iterations, "consulting model");

            let response = match self
                .model
                .respond(&self.instructions, &session.messages, self.catalog.tools())
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    self.state = RuntimeState::Failed;
                    return Err(match e {
                        AskrError::Llm(_) => e,
                        other => AskrError::Llm(other.to_string()),
                    });
                }
            };

            match response {
                LlmResponse::ToolCalls { content, calls } if !calls.is_empty() => {
                    self.state = RuntimeState::AwaitingTool;
                    session.add_message(Message::tool_request(
                        content.unwrap_or_default(),
                        calls.clone(),
                        session_id,
                    ));
                    let results = join_all(calls.iter().map(|call| self.dispatch(call))).await;
                    for result in &results {
                        session.add_message(Message::tool_result(result, session_id));
                    }
                }
                LlmResponse::ToolCalls { content, .. } => {
                    return Ok(self.finish(session, content.unwrap_or_default()));
                }
                LlmResponse::Final(text) => return Ok(self.finish(session, text)),
            }
        }
    }

    fn finish(&mut self, session: &mut Session, text: String) -> String {
        session.add_message(Message::assistant(text.clone(), session.id));
        self.state = RuntimeState::Done;
        info!(
            session_id = %session.id,
            iterations = self.iterations,
            "agent loop completed"
        );
        text
    }

    async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        let Some(route) = self.catalog.route(&call.name) else {
            warn!(tool = %call.name, call_id = %call.id, "model requested an unknown tool");
            return ToolResult::error(&call.id, format!("Unknown tool '{}'", call.name));
        };

        info!(
            tool = %call.name,
            server = %route.server,
            call_id = %call.id,
            "executing tool call"
        );
        match self
            .dispatcher
            .call_tool(&route.server, &route.raw_name, call.arguments.clone())
            .await
        {
            Ok(output) => ToolResult::success(&call.id, output),
            Err(e) => {
                warn!(tool = %call.name, call_id = %call.id, error = %e, "tool call failed");
                ToolResult::error(&call.id, e.to_string())
            }
        }
    }
}
