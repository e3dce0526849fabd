//! Progress pipeline: translate orchestrator events into throttled,
//! adaptive status renderings.
//!
//! Simple mode is a single status line naming the current tool; the first
//! todo payload switches the tracker to plan mode for the rest of the
//! execution. Status edits are throttled; the final deletion of the
//! status message is the dispatcher's job.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;

use crate::models::progress::{ProgressEvent, TodoItem};
use crate::orchestrator::injection::InjectionQueue;

use super::formatting::{format_duration, render_simple_status, render_todo_status};
use super::gateway::SlackGateway;

/// Local state for one execution's status message.
pub struct ProgressTracker {
    instance_label: String,
    queue: InjectionQueue,
    /// `None` means simple mode; the transition to plan mode is one-way
    /// within an execution.
    todos: Option<Vec<TodoItem>>,
    current_tool: Option<String>,
    current_agent: Option<String>,
    started: Instant,
    last_update: Option<Instant>,
    throttle: Duration,
}

impl ProgressTracker {
    #[must_use]
    pub fn new(instance_label: String, queue: InjectionQueue, throttle: Duration) -> Self {
        Self {
            instance_label,
            queue,
            todos: None,
            current_tool: None,
            current_agent: None,
            started: Instant::now(),
            last_update: None,
            throttle,
        }
    }

    /// Fold one event into the local state.
    pub fn apply(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Thinking { .. } => {
                self.current_tool = None;
                self.current_agent = None;
            }
            ProgressEvent::ToolStart {
                name,
                agent,
                todos,
                ..
            } => {
                self.current_tool = Some(name.clone());
                self.current_agent = agent.clone();
                if let Some(todos) = todos {
                    self.todos = Some(todos.clone());
                }
            }
            ProgressEvent::ToolEnd { todos, .. } => {
                if let Some(todos) = todos {
                    self.todos = Some(todos.clone());
                }
            }
            ProgressEvent::ContentDelta { .. }
            | ProgressEvent::InjectionApplied { .. }
            | ProgressEvent::Complete { .. }
            | ProgressEvent::Error { .. } => {}
        }
    }

    /// Render the current status text.
    #[must_use]
    pub fn render(&self) -> String {
        let duration = format_duration(self.started.elapsed().as_secs());
        let queued = self.queue.len();
        match &self.todos {
            Some(todos) if !todos.is_empty() => render_todo_status(
                todos,
                self.current_tool.as_deref(),
                &self.instance_label,
                &duration,
                queued,
            ),
            _ => render_simple_status(
                self.current_tool.as_deref(),
                self.current_agent.as_deref(),
                &duration,
                queued,
            ),
        }
    }

    /// Throttle gate: at most one status update per throttle window.
    pub fn ready_for_update(&mut self) -> bool {
        let now = Instant::now();
        match self.last_update {
            Some(last) if now.duration_since(last) < self.throttle => false,
            _ => {
                self.last_update = Some(now);
                true
            }
        }
    }
}

/// Consume orchestrator events and drive the status message until the
/// event stream closes. Slow consumers drop updates via the throttle;
/// they never stall the orchestrator (the channel is unbounded and this
/// task is detached from the loop).
pub async fn drive_status_updates(
    mut rx: UnboundedReceiver<ProgressEvent>,
    mut tracker: ProgressTracker,
    gateway: Arc<dyn SlackGateway>,
    channel: String,
    status_ts: String,
) {
    while let Some(event) = rx.recv().await {
        tracker.apply(&event);
        if matches!(
            event,
            ProgressEvent::Complete { .. } | ProgressEvent::Error { .. }
        ) {
            break;
        }
        if tracker.ready_for_update() {
            if let Err(err) = gateway
                .update_message(&channel, &status_ts, &tracker.render())
                .await
            {
                debug!(%err, "status update failed");
            }
        }
    }
}
