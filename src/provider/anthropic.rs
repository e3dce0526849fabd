//! Anthropic Messages API provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::models::message::{ChatMessage, Role, ToolCall};
use crate::Result;

use super::retry::{classify_status, retrying, CallError};
use super::{ChatProvider, ChatRequest, ChatResponse};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl AnthropicProvider {
    #[must_use]
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model: DEFAULT_MODEL.to_owned(),
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: Vec<Value>,
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

/// Convert the context view into Anthropic wire messages.
///
/// System-role context (worker reports, reminders) is folded into user
/// turns; consecutive tool results merge into one `tool_result` user turn
/// as the API requires.
fn convert_messages(messages: &[ChatMessage]) -> Vec<WireMessage> {
    let mut wire: Vec<WireMessage> = Vec::new();

    for msg in messages {
        match msg.role {
            Role::User | Role::System => {
                if msg.content.is_empty() {
                    continue;
                }
                wire.push(WireMessage {
                    role: "user",
                    content: vec![json!({"type": "text", "text": msg.content})],
                });
            }
            Role::Assistant => {
                let mut content = Vec::new();
                if !msg.content.is_empty() {
                    content.push(json!({"type": "text", "text": msg.content}));
                }
                for call in &msg.tool_calls {
                    content.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": call.arguments,
                    }));
                }
                if content.is_empty() {
                    continue;
                }
                wire.push(WireMessage {
                    role: "assistant",
                    content,
                });
            }
            Role::Tool => {
                let block = json!({
                    "type": "tool_result",
                    "tool_use_id": msg.tool_call_id.clone().unwrap_or_default(),
                    "content": msg.content,
                });
                match wire.last_mut() {
                    Some(last)
                        if last.role == "user"
                            && last
                                .content
                                .first()
                                .and_then(|c| c.get("type"))
                                .and_then(Value::as_str)
                                == Some("tool_result") =>
                    {
                        last.content.push(block);
                    }
                    _ => wire.push(WireMessage {
                        role: "user",
                        content: vec![block],
                    }),
                }
            }
        }
    }

    wire
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let mut body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": convert_messages(&request.messages),
        });
        if let Some(ref tools) = request.tools {
            let specs: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.input_schema,
                    })
                })
                .collect();
            body["tools"] = Value::Array(specs);
        }

        let parsed: ApiResponse = retrying("anthropic.messages", || {
            let body = body.clone();
            async move {
                let response = self
                    .client
                    .post(API_URL)
                    .header("x-api-key", &self.api_key)
                    .header("anthropic-version", API_VERSION)
                    .json(&body)
                    .send()
                    .await?;
                let status = response.status();
                let text = response.text().await?;
                if !status.is_success() {
                    return Err(classify_status(status, &text));
                }
                serde_json::from_str(&text)
                    .map_err(|err| CallError::Permanent(crate::AppError::Provider(format!(
                        "malformed anthropic response: {err}"
                    ))))
            }
        })
        .await?;

        let mut text_parts = Vec::new();
        let mut tool_calls = Vec::new();
        for block in parsed.content {
            match block {
                ContentBlock::Text { text } if !text.is_empty() => text_parts.push(text),
                ContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall::new(id, name, input));
                }
                _ => {}
            }
        }

        Ok(ChatResponse {
            text: text_parts.join("\n\n"),
            tool_calls,
        })
    }
}
