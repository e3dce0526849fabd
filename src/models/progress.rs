//! Progress event types emitted by the agent loop.
//!
//! Events are advisory: losing one must not corrupt conversation state,
//! and a slow consumer must never stall the orchestrator.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status of a single plan item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Completed,
    InProgress,
    Pending,
}

/// A single item in an instance's working plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TodoItem {
    /// Imperative task description.
    pub content: String,
    /// Present-continuous form shown while the item is in progress.
    #[serde(default, rename = "activeForm")]
    pub active_form: String,
    pub status: TodoStatus,
}

/// Terminal status carried by [`ProgressEvent::Complete`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Success,
    Cancelled,
}

/// Events emitted during one `execute` call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A provider call is about to be made.
    Thinking { iteration: u32 },
    /// Assistant text produced by the most recent provider response.
    ContentDelta { text: String },
    /// A tool call is starting.
    ToolStart {
        name: String,
        args_digest: String,
        /// Delegate target, when the tool is `delegate`.
        agent: Option<String>,
        /// Plan snapshot, when the tool is `todo`.
        todos: Option<Vec<TodoItem>>,
    },
    /// A tool call finished.
    ToolEnd {
        name: String,
        duration_ms: u64,
        todos: Option<Vec<TodoItem>>,
    },
    /// Queued mid-execution messages were folded into the context.
    InjectionApplied { count: usize },
    /// The loop reached a terminal text response.
    Complete { status: CompletionStatus },
    /// The loop failed (provider exhausted retries, iteration cap, ...).
    Error { message: String },
}

/// Accept a field that may arrive as a parsed value or as a JSON string.
///
/// Providers occasionally hand tool arguments through as serialized JSON;
/// the core boundary parses-or-rejects rather than coercing shapes.
fn object_or_json_str(value: &Value) -> Option<Value> {
    match value {
        Value::String(s) => serde_json::from_str(s).ok(),
        other => Some(other.clone()),
    }
}

/// Extract the plan snapshot from `todo` tool arguments or results.
///
/// Arguments carry `todos` for the `create` / `update` actions; `list`
/// results carry the full list at the top level or under `todos`.
#[must_use]
pub fn extract_todos(payload: &Value) -> Option<Vec<TodoItem>> {
    let payload = object_or_json_str(payload)?;
    let raw = match &payload {
        Value::Array(_) => payload.clone(),
        Value::Object(map) => map.get("todos").cloned()?,
        _ => return None,
    };
    let raw = object_or_json_str(&raw)?;
    serde_json::from_value(raw).ok()
}

/// Extract the delegate target from `delegate` tool arguments.
#[must_use]
pub fn extract_agent(arguments: &Value) -> Option<String> {
    let parsed = object_or_json_str(arguments)?;
    parsed
        .get("agent")
        .and_then(Value::as_str)
        .map(str::to_owned)
}
