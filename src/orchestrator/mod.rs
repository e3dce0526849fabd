//! The agent loop: drive an LLM-tool conversation to a terminal text
//! response while permitting mid-flight user steering.
//!
//! Three injection drain points cover the arrival windows: point 1 catches
//! between-turn arrivals, point 2 prevents a premature terminal response
//! when the user has just spoken, point 3 catches arrivals during tool
//! execution.

pub mod injection;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde_json::json;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::models::message::{args_digest, ChatMessage, ToolCall, ToolOutput};
use crate::models::progress::{
    extract_agent, extract_todos, CompletionStatus, ProgressEvent,
};
use crate::provider::{ChatProvider, ChatRequest};
use crate::session::hooks::{HookAction, HookCoordinator, HookEvent};
use crate::session::registry::SessionState;
use crate::tools::ToolRegistry;
use crate::Result;

use injection::{synthesize_injection, InjectionQueue};

/// Best-effort progress emitter. A missing or lagging consumer never
/// stalls the loop.
#[derive(Clone, Default)]
pub struct ProgressSink {
    tx: Option<UnboundedSender<ProgressEvent>>,
}

impl ProgressSink {
    #[must_use]
    pub fn new(tx: UnboundedSender<ProgressEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(ref tx) = self.tx {
            let _ = tx.send(event);
        }
    }
}

/// Per-execution environment handed in by the caller.
pub struct ExecutionEnv {
    /// Steering queue; the dispatcher holds a clone in `ActiveExecutions`.
    pub queue: InjectionQueue,
    pub progress: ProgressSink,
    pub cancel: CancellationToken,
}

/// The agent loop runner. One instance per session registry; all state
/// that varies per call lives in [`ExecutionEnv`] and [`SessionState`].
pub struct Orchestrator {
    provider: Arc<dyn ChatProvider>,
    max_iterations: u32,
    force_respond_tools: HashSet<String>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        max_iterations: u32,
        force_respond_tools: HashSet<String>,
    ) -> Self {
        Self {
            provider,
            max_iterations,
            force_respond_tools,
        }
    }

    /// Drive the loop to a terminal text response.
    ///
    /// Returns accumulated assistant text; on cancellation the text
    /// accumulated so far. The iteration cap emits an error event and
    /// returns best-effort partial text.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Provider` when the provider still fails after
    /// its retries.
    pub async fn execute(
        &self,
        state: &mut SessionState,
        hooks: &HookCoordinator,
        prompt: &str,
        env: &ExecutionEnv,
    ) -> Result<String> {
        let _ = hooks
            .fire(HookEvent::PromptSubmit, &json!({ "prompt": prompt }))
            .await;

        state.push(ChatMessage::user(prompt)).await;

        let mut accumulated = String::new();
        let mut force_respond = false;

        for iteration in 1..=self.max_iterations {
            if env.cancel.is_cancelled() {
                info!(iteration, "execution cancelled at iteration start");
                env.progress.emit(ProgressEvent::Complete {
                    status: CompletionStatus::Cancelled,
                });
                return Ok(accumulated);
            }

            // Injection point 1.
            self.drain_injections(state, hooks, env).await;

            env.progress.emit(ProgressEvent::Thinking { iteration });

            let registry = hooks.tools();
            // Force-respond strips every tool from the request; the flag
            // is one-shot and resets here.
            let tools = if force_respond || registry.is_empty() {
                None
            } else {
                Some(registry.specs())
            };
            force_respond = false;

            let request = ChatRequest {
                messages: state.context.clone(),
                tools,
            };
            let _ = hooks
                .fire(
                    HookEvent::ProviderRequest,
                    &json!({ "messages": request.messages.len(), "has_tools": request.tools.is_some() }),
                )
                .await;

            if env.cancel.is_cancelled() {
                env.progress.emit(ProgressEvent::Complete {
                    status: CompletionStatus::Cancelled,
                });
                return Ok(accumulated);
            }

            let response = match self.provider.complete(&request).await {
                Ok(response) => response,
                Err(err) => {
                    env.progress.emit(ProgressEvent::Error {
                        message: err.to_string(),
                    });
                    return Err(err);
                }
            };

            // Cancellation during the provider call: the in-flight call ran
            // to completion; its result is discarded and the loop exits.
            if env.cancel.is_cancelled() {
                info!(iteration, "cancelled during provider call; response discarded");
                env.progress.emit(ProgressEvent::Complete {
                    status: CompletionStatus::Cancelled,
                });
                return Ok(accumulated);
            }

            if !response.text.is_empty() {
                env.progress.emit(ProgressEvent::ContentDelta {
                    text: response.text.clone(),
                });
                accumulated.push_str(&response.text);
            }

            state
                .push(ChatMessage::assistant(
                    response.text.clone(),
                    response.tool_calls.clone(),
                ))
                .await;

            if response.tool_calls.is_empty() {
                // Injection point 2: the user spoke while the model was
                // thinking — continue instead of exiting.
                if !env.queue.is_empty() {
                    self.drain_injections(state, hooks, env).await;
                    continue;
                }
                env.progress.emit(ProgressEvent::Complete {
                    status: CompletionStatus::Success,
                });
                return Ok(accumulated);
            }

            let results = join_all(
                response
                    .tool_calls
                    .iter()
                    .map(|call| self.run_tool(call, &registry, hooks, env)),
            )
            .await;

            for (call, output) in &results {
                if self.force_respond_tools.contains(&call.name) {
                    force_respond = true;
                }
                state
                    .push(ChatMessage::tool_result(&call.id, &output.output))
                    .await;
            }

            // Injection point 3.
            self.drain_injections(state, hooks, env).await;
        }

        warn!(
            max_iterations = self.max_iterations,
            "iteration cap exhausted"
        );
        env.progress.emit(ProgressEvent::Error {
            message: format!(
                "iteration cap exhausted after {} iterations",
                self.max_iterations
            ),
        });
        Ok(accumulated)
    }

    /// Drain the queue into a single synthesized user message.
    async fn drain_injections(
        &self,
        state: &mut SessionState,
        hooks: &HookCoordinator,
        env: &ExecutionEnv,
    ) {
        let pending = env.queue.drain();
        if pending.is_empty() {
            return;
        }
        let count = pending.len();
        state
            .push(ChatMessage::user(synthesize_injection(&pending)))
            .await;
        let _ = hooks
            .fire(HookEvent::InjectionApplied, &json!({ "count": count }))
            .await;
        env.progress.emit(ProgressEvent::InjectionApplied { count });
        info!(count, "injections applied");
    }

    /// Run one tool call through the pre-hook → execute → post-hook
    /// pipeline. Failures become error-flagged results; the loop continues.
    async fn run_tool(
        &self,
        call: &ToolCall,
        registry: &ToolRegistry,
        hooks: &HookCoordinator,
        env: &ExecutionEnv,
    ) -> (ToolCall, ToolOutput) {
        let start = Instant::now();
        let todos_from_args = (call.name == "todo").then(|| extract_todos(&call.arguments)).flatten();
        let agent = (call.name == "delegate")
            .then(|| extract_agent(&call.arguments))
            .flatten();

        env.progress.emit(ProgressEvent::ToolStart {
            name: call.name.clone(),
            args_digest: args_digest(&call.arguments),
            agent,
            todos: todos_from_args.clone(),
        });

        let pre = hooks
            .fire(
                HookEvent::ToolPre,
                &json!({ "name": call.name, "arguments": call.arguments }),
            )
            .await;

        let output = if pre.action == HookAction::Deny {
            let reason = pre
                .metadata
                .as_ref()
                .and_then(|m| m.as_str())
                .unwrap_or("denied by policy hook");
            warn!(tool = %call.name, reason, "tool call denied by pre-hook");
            ToolOutput::error(format!("Tool call denied: {reason}"))
        } else {
            match registry.get(&call.name) {
                Some(tool) => tool.execute(call.arguments.clone()).await,
                None => ToolOutput::error(format!("Tool not found: {}", call.name)),
            }
        };

        let _ = hooks
            .fire(
                HookEvent::ToolPost,
                &json!({ "name": call.name, "success": output.success }),
            )
            .await;

        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        let todos_from_result = (call.name == "todo")
            .then(|| output.data.as_ref().and_then(extract_todos))
            .flatten()
            .or(todos_from_args);

        env.progress.emit(ProgressEvent::ToolEnd {
            name: call.name.clone(),
            duration_ms,
            todos: todos_from_result,
        });
        info!(tool = %call.name, duration_ms, success = output.success, "tool executed");

        (call.clone(), output)
    }
}
