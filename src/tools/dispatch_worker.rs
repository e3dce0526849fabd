//! Background worker dispatch for the Director pattern.
//!
//! The Director calls this tool to hand off long-running work. The tool
//! returns immediately; the worker runs in its own session and writes
//! results to TASKS.md. Completion reports arrive via `notify` (queued
//! for the *next* execution) rather than inject, so a force-respond
//! response is not kept alive by its own worker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::models::message::ToolOutput;
use crate::session::registry::{ExecuteOptions, SessionRegistry};
use crate::workers::WorkerManager;

use super::task_store::TaskStore;
use super::Tool;

const SUMMARY_LIMIT: usize = 500;

pub struct DispatchWorkerTool {
    registry: Weak<SessionRegistry>,
    workers: Arc<WorkerManager>,
    store: Arc<TaskStore>,
    instance_name: String,
    director_conversation_id: String,
    counter: AtomicU64,
}

impl DispatchWorkerTool {
    #[must_use]
    pub fn new(
        registry: Weak<SessionRegistry>,
        workers: Arc<WorkerManager>,
        store: Arc<TaskStore>,
        instance_name: String,
        director_conversation_id: String,
    ) -> Self {
        Self {
            registry,
            workers,
            store,
            instance_name,
            director_conversation_id,
            counter: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl Tool for DispatchWorkerTool {
    fn name(&self) -> &str {
        "dispatch_worker"
    }

    fn description(&self) -> &str {
        "Dispatch a task to a background worker. Use for work that takes more \
         than a few seconds. The worker runs independently and writes results \
         to TASKS.md when done. IMPORTANT: After calling this tool, respond to \
         the user IMMEDIATELY. Do NOT read files, call other tools, or do any \
         more work. Just confirm the dispatch and ask what else they need."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "Complete task description for the worker. Must be self-contained -- include all context the worker needs. The worker cannot see this conversation.",
                },
                "task_id": {
                    "type": "string",
                    "description": "Short identifier for this task (e.g., 'deck-stain-research'). Used in TASKS.md tracking.",
                },
            },
            "required": ["task", "task_id"],
        })
    }

    async fn execute(&self, input: Value) -> ToolOutput {
        let task = input.get("task").and_then(Value::as_str).unwrap_or("");
        let task_id = input.get("task_id").and_then(Value::as_str).unwrap_or("");

        if task.is_empty() {
            return ToolOutput::error("No task provided");
        }
        if task_id.is_empty() {
            return ToolOutput::error("No task_id provided");
        }

        let Some(registry) = self.registry.upgrade() else {
            return ToolOutput::error("Session registry is shutting down");
        };

        let ordinal = self.counter.fetch_add(1, Ordering::SeqCst) + 1;

        if let Err(err) = self.store.add_active(task_id, task).await {
            return ToolOutput::error(format!("Failed to record task: {err}"));
        }

        let worker = WorkerRun {
            registry,
            workers: Arc::clone(&self.workers),
            store: Arc::clone(&self.store),
            instance_name: self.instance_name.clone(),
            director_conversation_id: self.director_conversation_id.clone(),
            task: task.to_owned(),
            task_id: task_id.to_owned(),
            ordinal,
        };
        let handle = tokio::spawn(worker.run());
        self.workers
            .register(task_id, handle, &format!("Worker: {task_id}"));

        ToolOutput::ok(format!(
            "Worker dispatched: {task_id}. TASKS.md updated. \
             STOP. Do NOT call any more tools. Respond to the user NOW -- \
             confirm what you dispatched and ask what else they need."
        ))
    }
}

struct WorkerRun {
    registry: Arc<SessionRegistry>,
    workers: Arc<WorkerManager>,
    store: Arc<TaskStore>,
    instance_name: String,
    director_conversation_id: String,
    task: String,
    task_id: String,
    ordinal: u64,
}

impl WorkerRun {
    async fn run(self) {
        let conversation_id = format!("worker:{}:{}", self.task_id, self.ordinal);
        info!(task_id = %self.task_id, %conversation_id, "background worker starting");

        let outcome = self
            .registry
            .execute(
                &self.instance_name,
                &conversation_id,
                &self.task,
                ExecuteOptions::default(),
            )
            .await;

        match outcome {
            Ok(response) => {
                let mut summary = response.trim().to_owned();
                if summary.chars().count() > SUMMARY_LIMIT {
                    summary = summary.chars().take(SUMMARY_LIMIT).collect::<String>()
                        + "... [truncated -- ask the Director for the full result]";
                }

                if let Err(err) = self.store.complete_task(&self.task_id, &summary).await {
                    error!(task_id = %self.task_id, %err, "failed to record completion");
                }
                info!(task_id = %self.task_id, "background worker completed");

                let report = format!(
                    "[WORKER REPORT] Task \"{}\" completed.\nResult: {summary}\nFull details in TASKS.md.",
                    self.task_id
                );
                if let Err(err) = self
                    .registry
                    .notify(&self.instance_name, &self.director_conversation_id, &report)
                    .await
                {
                    error!(task_id = %self.task_id, %err, "failed to notify director");
                }
            }
            Err(err) => {
                error!(task_id = %self.task_id, %err, "background worker failed");
                if let Err(store_err) = self.store.fail_task(&self.task_id, &err.to_string()).await
                {
                    error!(task_id = %self.task_id, %store_err, "failed to record failure");
                }
                let report = format!(
                    "[WORKER REPORT] Task \"{}\" FAILED.\nError: {err}",
                    self.task_id
                );
                if let Err(notify_err) = self
                    .registry
                    .notify(&self.instance_name, &self.director_conversation_id, &report)
                    .await
                {
                    error!(task_id = %self.task_id, %notify_err, "failed to notify director");
                }
            }
        }

        self.workers.unregister(&self.task_id);
    }
}
