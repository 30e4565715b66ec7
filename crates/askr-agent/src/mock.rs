use crate::llm::{LlmResponse, ModelAdapter};
use askr_core::{AskrError, AskrResult, Message};
use askr_mcp::ToolDescriptor;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// What the scripted model was asked on one call.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Instructions passed in.
    pub instructions: String,
    /// The full history at that point.
    pub messages: Vec<Message>,
    /// Visible tool names offered.
    pub tools: Vec<String>,
}

/// A pre-scripted model. Each call pops the next response from the front of
/// the queue; once empty it either repeats a fixed response or fails.
pub struct ScriptedModel {
    script: Mutex<VecDeque<AskrResult<LlmResponse>>>,
    repeat: Option<LlmResponse>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedModel {
    /// Model answering with `responses` in order.
    pub fn new(responses: Vec<LlmResponse>) -> Self {
        Self::from_results(responses.into_iter().map(Ok).collect())
    }

    /// Like [`new`](Self::new) but individual calls may fail.
    pub fn from_results(script: Vec<AskrResult<LlmResponse>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Model that gives the same response forever.
    pub fn repeating(response: LlmResponse) -> Self {
        Self {
            repeat: Some(response),
            ..Self::new(Vec::new())
        }
    }

    /// Model with a single final answer.
    pub fn answer(text: impl Into<String>) -> Self {
        Self::new(vec![LlmResponse::Final(text.into())])
    }

    /// Number of calls received.
    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.requests).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[async_trait]
impl ModelAdapter for ScriptedModel {
    async fn respond(
        &self,
        instructions: &str,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> AskrResult<LlmResponse> {
        lock(&self.requests).push(RecordedRequest {
            instructions: instructions.to_string(),
            messages: messages.to_vec(),
            tools: tools.iter().map(|t| t.name.clone()).collect(),
        });

        if let Some(next) = lock(&self.script).pop_front() {
            return next;
        }
        self.repeat
            .clone()
            .ok_or_else(|| AskrError::Llm("scripted model has no responses left".into()))
    }
}
