use askr_core::{AskrError, AskrResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Supported LLM providers, selected by the prefix of `llm.model`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// OpenAI chat completions.
    OpenAi,
    /// OpenRouter (OpenAI-compatible).
    OpenRouter,
    /// Local Ollama server (OpenAI-compatible).
    Ollama,
    /// Local LM Studio server (OpenAI-compatible).
    LmStudio,
    /// Google Gemini through its OpenAI-compatible endpoint.
    Google,
    /// Anthropic messages API.
    Anthropic,
}

impl Provider {
    /// Split a `provider:model` descriptor. The model part may itself contain
    /// colons (`ollama:qwen3:1.7b`).
    pub fn parse_descriptor(descriptor: &str) -> AskrResult<(Self, String)> {
        let (provider, model) = descriptor.split_once(':').ok_or_else(|| {
            AskrError::Config(format!(
                "Invalid model format '{descriptor}': expected 'provider:model'"
            ))
        })?;
        if model.is_empty() {
            return Err(AskrError::Config(format!(
                "Invalid model format '{descriptor}': model name is empty"
            )));
        }
        let provider = match provider.to_lowercase().as_str() {
            "openai" => Provider::OpenAi,
            "openrouter" => Provider::OpenRouter,
            "ollama" => Provider::Ollama,
            "lmstudio" => Provider::LmStudio,
            "google" => Provider::Google,
            "anthropic" => Provider::Anthropic,
            other => {
                return Err(AskrError::Config(format!(
                    "Unsupported provider '{other}' in '{descriptor}'"
                )))
            }
        };
        Ok((provider, model.to_string()))
    }

    /// Base URL used when `llm.base_url` is not set.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::OpenAi => "https://api.openai.com/v1",
            Provider::OpenRouter => "https://openrouter.ai/api/v1",
            Provider::Ollama => "http://localhost:11434/v1",
            Provider::LmStudio => "http://localhost:1234/v1",
            Provider::Google => "https://generativelanguage.googleapis.com/v1beta/openai",
            Provider::Anthropic => "https://api.anthropic.com/v1",
        }
    }

    /// Whether the provider refuses requests without a credential.
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, Provider::Ollama | Provider::LmStudio)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provider::OpenAi => "openai",
            Provider::OpenRouter => "openrouter",
            Provider::Ollama => "ollama",
            Provider::LmStudio => "lmstudio",
            Provider::Google => "google",
            Provider::Anthropic => "anthropic",
        };
        f.write_str(name)
    }
}

/// Fully materialized model settings, credential already resolved.
#[derive(Clone)]
pub struct ModelDescriptor {
    /// Provider variant.
    pub provider: Provider,
    /// Provider-side model name.
    pub model: String,
    /// Resolved credential, if any.
    pub api_key: Option<String>,
    /// Endpoint root, without a trailing slash.
    pub base_url: String,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Response token cap.
    pub max_tokens: Option<u32>,
    /// Deadline for one model HTTP request.
    pub timeout: Option<Duration>,
}

impl fmt::Debug for ModelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDescriptor")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout", &self.timeout)
            .finish()
    }
}
