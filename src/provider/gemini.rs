//! Google Gemini `generateContent` provider.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::models::message::{ChatMessage, Role, ToolCall};
use crate::Result;

use super::retry::{classify_status, retrying, CallError};
use super::{ChatProvider, ChatRequest, ChatResponse};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";

pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiProvider {
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
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<WireContent>,
}

#[derive(Deserialize)]
struct WireContent {
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Deserialize)]
struct WirePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "functionCall")]
    function_call: Option<WireFunctionCall>,
}

#[derive(Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

/// Gemini has no tool-call ids; synthesized ids are `<name>#<ordinal>` so
/// the function name can be recovered when converting tool results back.
fn call_id(name: &str, ordinal: usize) -> String {
    format!("{name}#{ordinal}")
}

fn name_from_call_id(id: &str) -> &str {
    id.rsplit_once('#').map_or(id, |(name, _)| name)
}

fn convert_messages(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .filter_map(|msg| match msg.role {
            Role::User | Role::System => {
                Some(json!({"role": "user", "parts": [{"text": msg.content}]}))
            }
            Role::Assistant => {
                let mut parts = Vec::new();
                if !msg.content.is_empty() {
                    parts.push(json!({"text": msg.content}));
                }
                for call in &msg.tool_calls {
                    parts.push(json!({
                        "functionCall": {"name": call.name, "args": call.arguments},
                    }));
                }
                if parts.is_empty() {
                    return None;
                }
                Some(json!({"role": "model", "parts": parts}))
            }
            Role::Tool => {
                let name = msg
                    .tool_call_id
                    .as_deref()
                    .map_or("tool", name_from_call_id);
                Some(json!({
                    "role": "user",
                    "parts": [{
                        "functionResponse": {
                            "name": name,
                            "response": {"output": msg.content},
                        },
                    }],
                }))
            }
        })
        .collect()
}

#[async_trait]
impl ChatProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let mut body = json!({
            "contents": convert_messages(&request.messages),
        });
        if let Some(ref tools) = request.tools {
            let declarations: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    })
                })
                .collect();
            body["tools"] = json!([{"functionDeclarations": declarations}]);
        }

        let url = format!(
            "{API_BASE}/{}:generateContent?key={}",
            self.model, self.api_key
        );

        let parsed: ApiResponse = retrying("gemini.generate_content", || {
            let body = body.clone();
            let url = url.clone();
            async move {
                let response = self.client.post(&url).json(&body).send().await?;
                let status = response.status();
                let text = response.text().await?;
                if !status.is_success() {
                    return Err(classify_status(status, &text));
                }
                serde_json::from_str(&text)
                    .map_err(|err| CallError::Permanent(crate::AppError::Provider(format!(
                        "malformed gemini response: {err}"
                    ))))
            }
        })
        .await?;

        let mut text_parts = Vec::new();
        let mut tool_calls = Vec::new();
        if let Some(content) = parsed.candidates.into_iter().next().and_then(|c| c.content) {
            for part in content.parts {
                if let Some(text) = part.text {
                    if !text.is_empty() {
                        text_parts.push(text);
                    }
                }
                if let Some(call) = part.function_call {
                    let id = call_id(&call.name, tool_calls.len());
                    tool_calls.push(ToolCall::new(id, call.name, call.args));
                }
            }
        }

        Ok(ChatResponse {
            text: text_parts.join("\n\n"),
            tool_calls,
        })
    }
}
