//! OpenAI-compatible `/v1/chat/completions` client with function calling.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{ChatRequest, ChatResponse, ModelClient, TokenStream, ToolCallRequest};
use crate::config::ModelSettings;
use crate::error::ModelError;
use crate::state::{ConversationMessage, Role};

#[derive(Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

pub struct OpenAiCompatClient {
    base_url: String,
    model: String,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            http_client: reqwest::Client::new(),
        }
    }

    pub fn from_settings(settings: &ModelSettings) -> Self {
        Self::new(&settings.base_url, &settings.model, settings.api_key())
    }

    fn role_to_string(role: Role) -> &'static str {
        match role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    fn build_messages(messages: &[ConversationMessage]) -> Vec<Value> {
        messages
            .iter()
            .map(|msg| {
                let mut wire = json!({
                    "role": Self::role_to_string(msg.role),
                    "content": msg.content,
                });
                if let Some(invocations) = msg.invocations.as_ref().filter(|i| !i.is_empty()) {
                    wire["tool_calls"] = invocations
                        .iter()
                        .map(|inv| {
                            json!({
                                "id": inv.id,
                                "type": "function",
                                "function": {
                                    "name": inv.name,
                                    "arguments": inv.args.to_string(),
                                }
                            })
                        })
                        .collect();
                }
                if let Some(call_id) = &msg.tool_call_id {
                    wire["tool_call_id"] = json!(call_id);
                }
                wire
            })
            .collect()
    }

    fn build_body(&self, request: &ChatRequest, stream: bool) -> WireRequest {
        let model = if request.model.is_empty() {
            self.model.clone()
        } else {
            request.model.clone()
        };
        WireRequest {
            model,
            messages: Self::build_messages(&request.messages),
            tools: request
                .tools
                .iter()
                .map(|schema| json!({"type": "function", "function": schema}))
                .collect(),
            stream,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }

    async fn post(&self, body: &WireRequest) -> Result<reqwest::Response, ModelError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let mut http_req = self.http_client.post(&url).json(body);
        if let Some(ref key) = self.api_key {
            http_req = http_req.bearer_auth(key);
        }

        let response = http_req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

fn parse_response(parsed: WireResponse) -> Result<ChatResponse, ModelError> {
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ModelError::Decode("response has no choices".into()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .into_iter()
        .map(|call| {
            // Arguments arrive as a JSON-encoded string
            let arguments = if call.function.arguments.trim().is_empty() {
                json!({})
            } else {
                serde_json::from_str(&call.function.arguments)
                    .unwrap_or(Value::String(call.function.arguments))
            };
            ToolCallRequest {
                id: call.id,
                name: call.function.name,
                arguments,
            }
        })
        .collect();

    Ok(ChatResponse {
        content: choice.message.content.unwrap_or_default(),
        tool_calls,
    })
}

enum SseLine {
    Token(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    serde_json::from_str::<Value>(data)
        .ok()
        .and_then(|v| {
            v["choices"][0]["delta"]["content"]
                .as_str()
                .map(|s| s.to_string())
        })
        .filter(|s| !s.is_empty())
        .map(SseLine::Token)
        .unwrap_or(SseLine::Skip)
}

struct SseState {
    bytes: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    buffer: Vec<u8>,
    pending: VecDeque<String>,
    done: bool,
}

#[async_trait]
impl ModelClient for OpenAiCompatClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ModelError> {
        let body = self.build_body(&request, false);
        tracing::debug!(model = %body.model, messages = body.messages.len(), tools = body.tools.len(), "Model request");

        let response = self.post(&body).await?;
        let parsed: WireResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Decode(e.to_string()))?;
        parse_response(parsed)
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<TokenStream, ModelError> {
        let body = self.build_body(&request, true);
        let response = self.post(&body).await?;

        let state = SseState {
            bytes: response.bytes_stream().map(|r| r.map(|b| b.to_vec())).boxed(),
            buffer: Vec::new(),
            pending: VecDeque::new(),
            done: false,
        };

        let stream = futures::stream::unfold(state, |mut st| async move {
            loop {
                if let Some(token) = st.pending.pop_front() {
                    return Some((Ok(token), st));
                }
                if st.done {
                    return None;
                }
                match st.bytes.next().await {
                    Some(Ok(chunk)) => {
                        st.buffer.extend_from_slice(&chunk);
                        while let Some(pos) = st.buffer.iter().position(|&b| b == b'\n') {
                            let line: Vec<u8> = st.buffer.drain(..=pos).collect();
                            match parse_sse_line(String::from_utf8_lossy(&line).trim()) {
                                SseLine::Token(t) => st.pending.push_back(t),
                                SseLine::Done => st.done = true,
                                SseLine::Skip => {}
                            }
                        }
                    }
                    Some(Err(e)) => {
                        st.done = true;
                        return Some((Err(ModelError::from(e)), st));
                    }
                    None => st.done = true,
                }
            }
        });

        Ok(stream.boxed())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{CapabilityResult, CapabilitySchema, ParamType};
    use crate::state::CapabilityInvocation;

    #[test]
    fn request_body_carries_tools_and_tool_messages() {
        let client = OpenAiCompatClient::new("http://localhost:11434/", "test-model", None);
        let invocation = CapabilityInvocation {
            id: "call_1".into(),
            name: "read_file".into(),
            args: json!({"path": "/tmp/a"}),
            result: CapabilityResult::success(Default::default(), 1),
        };
        let messages = vec![
            ConversationMessage::user("read it"),
            ConversationMessage::assistant_with_invocations("", vec![invocation]),
            ConversationMessage::tool("call_1", "{\"success\":true}"),
        ];
        let request = ChatRequest::new("", messages).with_tools(vec![CapabilitySchema::new(
            "read_file",
            "Read",
        )
        .param("path", ParamType::String, "p", true)]);

        let body = serde_json::to_value(client.build_body(&request, false)).unwrap();
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "read_file");
        assert_eq!(body["messages"][1]["tool_calls"][0]["function"]["arguments"], "{\"path\":\"/tmp/a\"}");
        assert_eq!(body["messages"][2]["role"], "tool");
        assert_eq!(body["messages"][2]["tool_call_id"], "call_1");
    }

    #[test]
    fn parses_tool_calls_with_string_arguments() {
        let parsed: WireResponse = serde_json::from_value(json!({
            "choices": [{"message": {"content": null, "tool_calls": [
                {"id": "c1", "type": "function", "function": {"name": "list_directory", "arguments": "{\"path\":\"/tmp\"}"}}
            ]}}]
        }))
        .unwrap();
        let response = parse_response(parsed).unwrap();
        assert_eq!(response.content, "");
        assert_eq!(response.tool_calls[0].arguments["path"], "/tmp");
    }

    #[test]
    fn sse_lines_yield_tokens_and_done() {
        assert!(matches!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#),
            SseLine::Token(t) if t == "Hel"
        ));
        assert!(matches!(parse_sse_line("data: [DONE]"), SseLine::Done));
        assert!(matches!(parse_sse_line(": keep-alive"), SseLine::Skip));
    }
}
