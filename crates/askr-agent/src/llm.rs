use crate::backends::anthropic::AnthropicBackend;
use crate::backends::openai::OpenAiBackend;
use askr_config::{ModelDescriptor, Provider};
use askr_core::{AskrResult, Message, ToolCall};
use askr_mcp::ToolDescriptor;
use async_trait::async_trait;

/// Response from the model: a final answer or a batch of tool calls.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmResponse {
    /// The model is done; this is its answer.
    Final(String),
    /// The model wants tools run before it continues.
    ToolCalls {
        /// Text the model emitted alongside the calls, if any.
        content: Option<String>,
        /// Requested calls, each with its own id.
        calls: Vec<ToolCall>,
    },
}

/// Anything that can answer a conversation turn.
///
/// Tool names in `tools` and in the returned calls are visible catalog
/// names; backends translate them to whatever their API accepts.
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    /// Produce the next response for `messages`.
    async fn respond(
        &self,
        instructions: &str,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> AskrResult<LlmResponse>;
}

/// LLM client that dispatches to the correct provider backend.
pub struct LlmClient {
    backend: Box<dyn ModelAdapter>,
}

impl LlmClient {
    /// Build the backend matching `descriptor.provider`.
    pub fn from_descriptor(descriptor: &ModelDescriptor) -> AskrResult<Self> {
        let backend: Box<dyn ModelAdapter> = match descriptor.provider {
            Provider::Anthropic => Box::new(AnthropicBackend::new(descriptor.clone())?),
            Provider::OpenAi
            | Provider::OpenRouter
            | Provider::Ollama
            | Provider::LmStudio
            | Provider::Google => Box::new(OpenAiBackend::new(descriptor.clone())?),
        };
        Ok(Self { backend })
    }

    /// Wrap a pre-built backend.
    pub fn from_backend(backend: Box<dyn ModelAdapter>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ModelAdapter for LlmClient {
    async fn respond(
        &self,
        instructions: &str,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> AskrResult<LlmResponse> {
        self.backend.respond(instructions, messages, tools).await
    }
}
