//! OpenAI Chat Completions provider.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::models::message::{ChatMessage, Role, ToolCall};
use crate::Result;

use super::retry::{classify_status, retrying, CallError};
use super::{ChatProvider, ChatRequest, ChatResponse};

const API_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o";

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
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

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: WireAssistant,
}

#[derive(Deserialize)]
struct WireAssistant {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    /// The API serializes arguments as a JSON string.
    arguments: String,
}

fn convert_messages(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .filter_map(|msg| match msg.role {
            Role::User => Some(json!({"role": "user", "content": msg.content})),
            Role::System => Some(json!({"role": "system", "content": msg.content})),
            Role::Assistant => {
                let mut obj = json!({"role": "assistant", "content": msg.content});
                if !msg.tool_calls.is_empty() {
                    let calls: Vec<Value> = msg
                        .tool_calls
                        .iter()
                        .map(|c| {
                            json!({
                                "id": c.id,
                                "type": "function",
                                "function": {
                                    "name": c.name,
                                    "arguments": c.arguments.to_string(),
                                },
                            })
                        })
                        .collect();
                    obj["tool_calls"] = Value::Array(calls);
                }
                Some(obj)
            }
            Role::Tool => Some(json!({
                "role": "tool",
                "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
                "content": msg.content,
            })),
        })
        .collect()
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let mut body = json!({
            "model": self.model,
            "messages": convert_messages(&request.messages),
        });
        if let Some(ref tools) = request.tools {
            let specs: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.input_schema,
                        },
                    })
                })
                .collect();
            body["tools"] = Value::Array(specs);
        }

        let parsed: ApiResponse = retrying("openai.chat", || {
            let body = body.clone();
            async move {
                let response = self
                    .client
                    .post(API_URL)
                    .bearer_auth(&self.api_key)
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
                        "malformed openai response: {err}"
                    ))))
            }
        })
        .await?;

        let Some(choice) = parsed.choices.into_iter().next() else {
            return Ok(ChatResponse::default());
        };

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|c| {
                let arguments = serde_json::from_str(&c.function.arguments)
                    .unwrap_or(Value::String(c.function.arguments));
                ToolCall::new(c.id, c.function.name, arguments)
            })
            .collect();

        Ok(ChatResponse {
            text: choice.message.content.unwrap_or_default(),
            tool_calls,
        })
    }
}
