//! LLM provider abstraction and credential-based detection.
//!
//! Follows the composition pattern shared across all providers: each
//! submodule owns its wire types and message conversion; this module owns
//! the [`ChatProvider`] seam the orchestrator talks to.
//!
//! Detection priority: explicit `[provider]` config, then Anthropic, then
//! OpenAI, then Gemini, from available credentials. A missing provider is a
//! setup error surfaced at session creation, never a silent drop.

pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod retry;

use std::env;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::config::{GlobalConfig, ProviderKind};
use crate::models::message::{ChatMessage, ToolCall};
use crate::{AppError, Result};

/// JSON-schema description of a tool offered to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// One request to a provider: the context view plus the tool snapshot.
///
/// `tools = None` is the force-respond shape — the model is given no tools
/// at all and must answer in text.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Option<Vec<ToolSpec>>,
}

/// Parsed provider response: terminal text plus any requested tool calls.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

/// Seam between the orchestrator and a concrete LLM backend.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Stable provider name for logs and transcripts.
    fn name(&self) -> &str;

    /// Execute one completion. Implementations retry transient transport
    /// errors internally with bounded exponential backoff.
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse>;
}

/// Detect the provider once at startup from config and credentials.
///
/// # Errors
///
/// Returns [`AppError::ProviderNotConfigured`] when neither an explicit
/// `[provider]` entry nor any known API key is present, and
/// `AppError::Config` when an explicit selection lacks its credential.
pub fn detect_provider(config: &GlobalConfig) -> Result<Arc<dyn ChatProvider>> {
    if let Some(kind) = config.provider {
        return build_explicit(kind);
    }

    if let Ok(key) = env::var("ANTHROPIC_API_KEY") {
        if !key.is_empty() {
            info!(provider = "anthropic", "provider detected from credentials");
            return Ok(Arc::new(anthropic::AnthropicProvider::new(key)));
        }
    }
    if let Ok(key) = env::var("OPENAI_API_KEY") {
        if !key.is_empty() {
            info!(provider = "openai", "provider detected from credentials");
            return Ok(Arc::new(openai::OpenAiProvider::new(key)));
        }
    }
    if let Ok(key) = env::var("GEMINI_API_KEY") {
        if !key.is_empty() {
            info!(provider = "gemini", "provider detected from credentials");
            return Ok(Arc::new(gemini::GeminiProvider::new(key)));
        }
    }

    Err(AppError::ProviderNotConfigured)
}

fn build_explicit(kind: ProviderKind) -> Result<Arc<dyn ChatProvider>> {
    let (env_key, label) = match kind {
        ProviderKind::Anthropic => ("ANTHROPIC_API_KEY", "anthropic"),
        ProviderKind::Openai => ("OPENAI_API_KEY", "openai"),
        ProviderKind::Gemini => ("GEMINI_API_KEY", "gemini"),
    };
    let key = env::var(env_key)
        .map_err(|_| AppError::Config(format!("provider '{label}' selected but {env_key} is not set")))?;
    info!(provider = label, "provider selected from config");
    Ok(match kind {
        ProviderKind::Anthropic => Arc::new(anthropic::AnthropicProvider::new(key)),
        ProviderKind::Openai => Arc::new(openai::OpenAiProvider::new(key)),
        ProviderKind::Gemini => Arc::new(gemini::GeminiProvider::new(key)),
    })
}
