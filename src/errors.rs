//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Slack API or Socket Mode failure.
    Slack(String),
    /// LLM provider transport or response failure.
    Provider(String),
    /// No LLM provider credentials are configured.
    ProviderNotConfigured,
    /// Tool execution failure surfaced outside the loop.
    Tool(String),
    /// Session creation or lookup failure.
    Session(String),
    /// Agent loop exhausted its iteration cap.
    IterationCap(u32),
    /// Execution cancelled by the user.
    Cancelled,
    /// Requested entity does not exist.
    NotFound(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Slack(msg) => write!(f, "slack: {msg}"),
            Self::Provider(msg) => write!(f, "provider: {msg}"),
            Self::ProviderNotConfigured => write!(
                f,
                "no-provider-configured: set ANTHROPIC_API_KEY, OPENAI_API_KEY, \
                 or GEMINI_API_KEY, or configure [provider] explicitly"
            ),
            Self::Tool(msg) => write!(f, "tool: {msg}"),
            Self::Session(msg) => write!(f, "session: {msg}"),
            Self::IterationCap(n) => write!(f, "iteration cap exhausted after {n} iterations"),
            Self::Cancelled => write!(f, "execution cancelled"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Io(format!("json: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::Provider(err.to_string())
    }
}
