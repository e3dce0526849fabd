//! Working-plan tool. The current list also drives plan-mode rendering
//! in the progress pipeline.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::models::message::ToolOutput;
use crate::models::progress::{extract_todos, TodoItem, TodoStatus};

use super::Tool;

#[derive(Default)]
pub struct TodoTool {
    items: Mutex<Vec<TodoItem>>,
}

impl TodoTool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn render(items: &[TodoItem]) -> String {
        if items.is_empty() {
            return "No tasks tracked.".to_owned();
        }
        items
            .iter()
            .map(|item| {
                let marker = match item.status {
                    TodoStatus::Completed => "[x]",
                    TodoStatus::InProgress => "[>]",
                    TodoStatus::Pending => "[ ]",
                };
                format!("{marker} {}", item.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl Tool for TodoTool {
    fn name(&self) -> &str {
        "todo"
    }

    fn description(&self) -> &str {
        "Track the working plan for the current task. Actions: 'create' \
         replaces the plan with the given todos, 'update' replaces it with \
         revised statuses, 'list' returns the current plan. Each todo has \
         content, activeForm, and status (pending | in_progress | completed)."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["create", "update", "list"],
                },
                "todos": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "content": {"type": "string"},
                            "activeForm": {"type": "string"},
                            "status": {
                                "type": "string",
                                "enum": ["pending", "in_progress", "completed"],
                            },
                        },
                        "required": ["content", "status"],
                    },
                },
            },
            "required": ["action"],
        })
    }

    async fn execute(&self, input: Value) -> ToolOutput {
        let action = input.get("action").and_then(Value::as_str).unwrap_or("");

        match action {
            "create" | "update" => {
                let Some(todos) = extract_todos(&input) else {
                    return ToolOutput::error("Missing or malformed 'todos' array");
                };
                let rendered = Self::render(&todos);
                *self.items.lock() = todos;
                ToolOutput::ok(rendered)
            }
            "list" => {
                let items = self.items.lock().clone();
                let mut output = ToolOutput::ok(Self::render(&items));
                output.data = serde_json::to_value(&items).ok().map(|v| json!({ "todos": v }));
                output
            }
            other => ToolOutput::error(format!("Unknown action: '{other}'")),
        }
    }
}
