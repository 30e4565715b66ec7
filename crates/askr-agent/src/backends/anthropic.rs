use super::{http_client, send_json, ToolNames};
use crate::llm::{LlmResponse, ModelAdapter};
use askr_config::ModelDescriptor;
use askr_core::{AskrError, AskrResult, Message, Role, ToolCall};
use askr_mcp::ToolDescriptor;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic messages API backend.
pub struct AnthropicBackend {
    descriptor: ModelDescriptor,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: Vec<Value>,
}

#[derive(Serialize)]
struct AnthropicTool<'a> {
    name: String,
    description: &'a str,
    input_schema: &'a Value,
}

impl AnthropicBackend {
    /// Backend for `descriptor`.
    pub fn new(descriptor: ModelDescriptor) -> AskrResult<Self> {
        let http = http_client(&descriptor)?;
        Ok(Self { descriptor, http })
    }
}

/// Encode history as content blocks. Consecutive turns with the same API
/// role are merged, so a batch of tool results lands in one user message.
fn build_messages(messages: &[Message], names: &ToolNames) -> Vec<AnthropicMessage> {
    let mut out: Vec<AnthropicMessage> = Vec::new();

    for m in messages {
        let (role, blocks) = match m.role {
            Role::User | Role::System => ("user", text_block(&m.content)),
            Role::Assistant => {
                let mut blocks = text_block(&m.content);
                blocks.extend(m.tool_calls.iter().map(|c| {
                    json!({
                        "type": "tool_use",
                        "id": c.id,
                        "name": names.wire(&c.name),
                        "input": c.arguments,
                    })
                }));
                ("assistant", blocks)
            }
            Role::Tool => (
                "user",
                vec![json!({
                    "type": "tool_result",
                    "tool_use_id": m.tool_call_id.clone().unwrap_or_default(),
                    "content": m.content,
                    "is_error": m.is_error,
                })],
            ),
        };
        if blocks.is_empty() {
            continue;
        }
        match out.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => out.push(AnthropicMessage {
                role,
                content: blocks,
            }),
        }
    }

    out
}

fn text_block(text: &str) -> Vec<Value> {
    if text.is_empty() {
        Vec::new()
    } else {
        vec![json!({"type": "text", "text": text})]
    }
}

#[async_trait]
impl ModelAdapter for AnthropicBackend {
    async fn respond(
        &self,
        instructions: &str,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> AskrResult<LlmResponse> {
        let url = format!("{}/messages", self.descriptor.base_url);
        let names = ToolNames::new(tools);

        let mut body = json!({
            "model": self.descriptor.model,
            "max_tokens": self.descriptor.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": build_messages(messages, &names),
        });
        if !instructions.is_empty() {
            body["system"] = json!(instructions);
        }
        if let Some(temperature) = self.descriptor.temperature {
            body["temperature"] = json!(temperature);
        }
        if !tools.is_empty() {
            let tools: Vec<AnthropicTool<'_>> = tools
                .iter()
                .map(|t| AnthropicTool {
                    name: names.wire(&t.name),
                    description: &t.description,
                    input_schema: &t.input_schema,
                })
                .collect();
            body["tools"] = serde_json::to_value(&tools)?;
        }

        debug!(
            model = %self.descriptor.model,
            messages = messages.len(),
            tools = tools.len(),
            "anthropic messages request"
        );
        let mut request = self
            .http
            .post(&url)
            .header("anthropic-version", ANTHROPIC_VERSION);
        if let Some(key) = &self.descriptor.api_key {
            request = request.header("x-api-key", key);
        }
        let resp_body = send_json("anthropic", request, &body).await?;
        parse_anthropic_response(&resp_body, &names)
    }
}

/// Decode a messages API body.
pub fn parse_anthropic_response(body: &Value, names: &ToolNames) -> AskrResult<LlmResponse> {
    let content = body["content"]
        .as_array()
        .ok_or_else(|| AskrError::Llm(format!("missing content in response: {body}")))?;

    let mut text_parts = Vec::new();
    let mut calls = Vec::new();

    for block in content {
        match block["type"].as_str() {
            Some("text") => {
                if let Some(t) = block["text"].as_str() {
                    text_parts.push(t.to_string());
                }
            }
            Some("tool_use") => {
                let Some(name) = block["name"].as_str() else {
                    continue;
                };
                calls.push(ToolCall {
                    id: block["id"].as_str().unwrap_or_default().to_string(),
                    name: names.visible(name),
                    arguments: block["input"].clone(),
                });
            }
            _ => {}
        }
    }

    let text = text_parts.join("\n");
    if calls.is_empty() {
        Ok(LlmResponse::Final(text))
    } else {
        Ok(LlmResponse::ToolCalls {
            content: if text.is_empty() { None } else { Some(text) },
            calls,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use askr_config::Provider;
    use askr_core::ToolResult;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tool() -> ToolDescriptor {
        ToolDescriptor {
            server: "web".into(),
            raw_name: "search".into(),
            name: "web.search".into(),
            description: "Search the web".into(),
            input_schema: json!({"type": "object"}),
        }
    }

    #[test]
    fn test_parallel_tool_results_share_one_user_message() {
        let names = ToolNames::new(&[tool()]);
        let sid = Default::default();
        let calls = vec![
            ToolCall {
                id: "t1".into(),
                name: "web.search".into(),
                arguments: json!({"q": "a"}),
            },
            ToolCall {
                id: "t2".into(),
                name: "web.search".into(),
                arguments: json!({"q": "b"}),
            },
        ];
        let history = vec![
            Message::user("compare", sid),
            Message::tool_request("Searching both.", calls, sid),
            Message::tool_result(&ToolResult::success("t2", "B"), sid),
            Message::tool_result(&ToolResult::error("t1", "timeout"), sid),
        ];
        let encoded = build_messages(&history, &names);
        assert_eq!(encoded.len(), 3);
        assert_eq!(encoded[1].role, "assistant");
        assert_eq!(encoded[1].content.len(), 3);
        assert_eq!(encoded[1].content[1]["name"], "web_search");
        assert_eq!(encoded[2].role, "user");
        assert_eq!(encoded[2].content.len(), 2);
        assert_eq!(encoded[2].content[0]["tool_use_id"], "t2");
        assert_eq!(encoded[2].content[1]["is_error"], true);
    }

    #[test]
    fn test_parse_tool_use() {
        let names = ToolNames::new(&[tool()]);
        let body = json!({
            "content": [
                {"type": "text", "text": "Let me look."},
                {"type": "tool_use", "id": "tu_1", "name": "web_search", "input": {"q": "rust"}}
            ],
            "stop_reason": "tool_use"
        });
        match parse_anthropic_response(&body, &names).unwrap() {
            LlmResponse::ToolCalls { content, calls } => {
                assert_eq!(content.as_deref(), Some("Let me look."));
                assert_eq!(calls[0].name, "web.search");
                assert_eq!(calls[0].arguments, json!({"q": "rust"}));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_request_headers_and_system_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "ak-test"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .and(body_partial_json(json!({
                "model": "claude-test",
                "system": "be brief",
                "max_tokens": 4096
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{"type": "text", "text": "ok"}],
                "stop_reason": "end_turn"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend = AnthropicBackend::new(ModelDescriptor {
            provider: Provider::Anthropic,
            model: "claude-test".into(),
            api_key: Some("ak-test".into()),
            base_url: format!("{}/v1", server.uri()),
            temperature: None,
            max_tokens: None,
            timeout: None,
        })
        .unwrap();
        let out = backend
            .respond("be brief", &[Message::user("hi", Default::default())], &[])
            .await
            .unwrap();
        assert_eq!(out, LlmResponse::Final("ok".into()));
    }
}
