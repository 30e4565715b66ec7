use super::{http_client, send_json, ToolNames};
use crate::llm::{LlmResponse, ModelAdapter};
use askr_config::{ModelDescriptor, Provider};
use askr_core::{AskrError, AskrResult, Message, Role, ToolCall};
use askr_mcp::ToolDescriptor;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

/// OpenAI-compatible API backend.
///
/// Serves OpenAI, OpenRouter, Ollama, LM Studio and Google, all of which
/// implement the chat completions API.
pub struct OpenAiBackend {
    descriptor: ModelDescriptor,
    http: reqwest::Client,
}

impl OpenAiBackend {
    /// Backend for `descriptor`.
    pub fn new(descriptor: ModelDescriptor) -> AskrResult<Self> {
        let http = http_client(&descriptor)?;
        Ok(Self { descriptor, http })
    }

    fn build_messages(
        &self,
        instructions: &str,
        messages: &[Message],
        names: &ToolNames,
    ) -> Vec<Value> {
        let mut api_messages = Vec::with_capacity(messages.len() + 1);
        if !instructions.is_empty() {
            api_messages.push(json!({"role": "system", "content": instructions}));
        }

        for m in messages {
            let entry = match m.role {
                Role::System => json!({"role": "system", "content": m.content}),
                Role::User => json!({"role": "user", "content": m.content}),
                Role::Assistant if m.tool_calls.is_empty() => {
                    json!({"role": "assistant", "content": m.content})
                }
                Role::Assistant => {
                    let calls: Vec<Value> = m
                        .tool_calls
                        .iter()
                        .map(|c| {
                            json!({
                                "id": c.id,
                                "type": "function",
                                "function": {
                                    "name": names.wire(&c.name),
                                    "arguments": c.arguments.to_string(),
                                }
                            })
                        })
                        .collect();
                    let content = if m.content.is_empty() {
                        Value::Null
                    } else {
                        Value::String(m.content.clone())
                    };
                    json!({"role": "assistant", "content": content, "tool_calls": calls})
                }
                Role::Tool => json!({
                    "role": "tool",
                    "tool_call_id": m.tool_call_id.clone().unwrap_or_default(),
                    "content": m.content,
                }),
            };
            api_messages.push(entry);
        }

        api_messages
    }

    fn build_tools(&self, tools: &[ToolDescriptor], names: &ToolNames) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": names.wire(&t.name),
                        "description": t.description,
                        "parameters": t.input_schema,
                    }
                })
            })
            .collect()
    }

    fn add_provider_headers(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = match &self.descriptor.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        };

        // OpenRouter attributes traffic through these headers
        if self.descriptor.provider == Provider::OpenRouter {
            request.header("X-Title", "askr")
        } else {
            request
        }
    }
}

#[async_trait]
impl ModelAdapter for OpenAiBackend {
    async fn respond(
        &self,
        instructions: &str,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> AskrResult<LlmResponse> {
        let url = format!("{}/chat/completions", self.descriptor.base_url);
        let names = ToolNames::new(tools);

        let mut body = json!({
            "model": self.descriptor.model,
            "messages": self.build_messages(instructions, messages, &names),
        });
        if let Some(temperature) = self.descriptor.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = self.descriptor.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if !tools.is_empty() {
            body["tools"] = json!(self.build_tools(tools, &names));
        }

        debug!(
            provider = %self.descriptor.provider,
            model = %self.descriptor.model,
            messages = messages.len(),
            tools = tools.len(),
            "chat completion request"
        );
        let request = self.add_provider_headers(self.http.post(&url));
        let resp_body = send_json(&self.descriptor.provider.to_string(), request, &body).await?;
        parse_openai_response(&resp_body, &names)
    }
}

/// Decode a chat completion body.
pub fn parse_openai_response(body: &Value, names: &ToolNames) -> AskrResult<LlmResponse> {
    let message = body["choices"]
        .get(0)
        .map(|choice| &choice["message"])
        .ok_or_else(|| AskrError::Llm(format!("response has no choices: {body}")))?;
    let content = message["content"].as_str().unwrap_or_default().to_string();

    let calls: Vec<ToolCall> = message["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .enumerate()
                .filter_map(|(i, tc)| {
                    let name = tc["function"]["name"].as_str()?;
                    let id = tc["id"]
                        .as_str()
                        .map_or_else(|| format!("call_{i}"), str::to_string);
                    let arguments = match &tc["function"]["arguments"] {
                        Value::String(raw) => {
                            serde_json::from_str(raw).unwrap_or_else(|_| json!({}))
                        }
                        Value::Null => json!({}),
                        other => other.clone(),
                    };
                    Some(ToolCall {
                        id,
                        name: names.visible(name),
                        arguments,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    if calls.is_empty() {
        Ok(LlmResponse::Final(content))
    } else {
        Ok(LlmResponse::ToolCalls {
            content: if content.is_empty() { None } else { Some(content) },
            calls,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{bearer_token, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn hello() -> Message {
        Message::user("hello", Default::default())
    }

    fn descriptor(base_url: String) -> ModelDescriptor {
        ModelDescriptor {
            provider: Provider::OpenAi,
            model: "gpt-test".into(),
            api_key: Some("sk-test".into()),
            base_url,
            temperature: Some(0.2),
            max_tokens: None,
            timeout: Some(Duration::from_secs(5)),
        }
    }

    fn tool(name: &str) -> ToolDescriptor {
        ToolDescriptor {
            server: "fs".into(),
            raw_name: "read".into(),
            name: name.into(),
            description: "Read a file".into(),
            input_schema: json!({"type": "object"}),
        }
    }

    #[test]
    fn test_parse_tool_calls_maps_names_back() {
        let names = ToolNames::new(&[tool("fs.read")]);
        let body = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_a",
                        "type": "function",
                        "function": {"name": "fs_read", "arguments": "{\"path\":\"/tmp\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        match parse_openai_response(&body, &names).unwrap() {
            LlmResponse::ToolCalls { content, calls } => {
                assert!(content.is_none());
                assert_eq!(calls[0].id, "call_a");
                assert_eq!(calls[0].name, "fs.read");
                assert_eq!(calls[0].arguments, json!({"path": "/tmp"}));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_final_and_missing_choices() {
        let names = ToolNames::default();
        let body = json!({"choices": [{"message": {"content": "done"}, "finish_reason": "stop"}]});
        assert_eq!(
            parse_openai_response(&body, &names).unwrap(),
            LlmResponse::Final("done".into())
        );
        let err = parse_openai_response(&json!({"error": "x"}), &names).unwrap_err();
        assert!(matches!(err, AskrError::Llm(_)));
    }

    #[test]
    fn test_history_encodes_tool_turns() {
        let backend = OpenAiBackend::new(descriptor("http://unused".into())).unwrap();
        let names = ToolNames::new(&[tool("fs.read")]);
        let sid = Default::default();
        let history = vec![
            Message::user("read it", sid),
            Message::tool_request(
                "",
                vec![ToolCall {
                    id: "c1".into(),
                    name: "fs.read".into(),
                    arguments: json!({"path": "a"}),
                }],
                sid,
            ),
            Message::tool_result(&askr_core::ToolResult::success("c1", "contents"), sid),
        ];
        let encoded = backend.build_messages("be brief", &history, &names);
        assert_eq!(encoded[0]["role"], "system");
        assert_eq!(encoded[2]["tool_calls"][0]["function"]["name"], "fs_read");
        assert_eq!(encoded[2]["content"], Value::Null);
        assert_eq!(encoded[3]["role"], "tool");
        assert_eq!(encoded[3]["tool_call_id"], "c1");
    }

    #[tokio::test]
    async fn test_request_shape_and_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(bearer_token("sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-test",
                "tools": [{"type": "function", "function": {"name": "fs_read"}}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "hi"}, "finish_reason": "stop"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend = OpenAiBackend::new(descriptor(format!("{}/v1", server.uri()))).unwrap();
        let out = backend
            .respond("", &[hello()], &[tool("fs.read")])
            .await
            .unwrap();
        assert_eq!(out, LlmResponse::Final("hi".into()));

        let failing = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&failing)
            .await;
        let backend = OpenAiBackend::new(descriptor(failing.uri())).unwrap();
        let err = backend.respond("", &[hello()], &[]).await.unwrap_err();
        assert!(err.to_string().contains("401"), "{err}");
        assert!(err.to_string().contains("bad key"), "{err}");
    }
}
