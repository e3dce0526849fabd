//! Tool trait, registry, and the built-in tool set.
//!
//! Tools are mounted on a session's hook coordinator — some at creation
//! (dispatch_worker, todo), some post-creation once a live Slack context
//! exists (the connector tools, which close over channel and thread).

pub mod dispatch_worker;
pub mod media;
pub mod slack_tools;
pub mod task_store;
pub mod todo;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::models::message::ToolOutput;
use crate::provider::ToolSpec;

/// A callable capability offered to the model.
///
/// Execution failures are returned as error-flagged [`ToolOutput`]s, never
/// as hard errors — the loop continues and the model decides how to react.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema describing the tool's input object.
    fn input_schema(&self) -> Value;

    async fn execute(&self, input: Value) -> ToolOutput;
}

/// Ordered collection of mounted tools.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount a tool. A later mount with the same name shadows the earlier
    /// one for lookups while keeping registration order for specs.
    pub fn mount(&mut self, tool: Arc<dyn Tool>) {
        self.tools.push(tool);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .iter()
            .rev()
            .find(|t| t.name() == name)
            .cloned()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Snapshot of tool descriptions for a provider request.
    #[must_use]
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut seen = std::collections::HashSet::new();
        let mut specs = Vec::new();
        // Later mounts shadow earlier ones, so walk in reverse and restore order.
        for tool in self.tools.iter().rev() {
            if seen.insert(tool.name().to_owned()) {
                specs.push(ToolSpec {
                    name: tool.name().to_owned(),
                    description: tool.description().to_owned(),
                    input_schema: tool.input_schema(),
                });
            }
        }
        specs.reverse();
        specs
    }
}
