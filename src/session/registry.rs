//! Session registry: the `(instance, conversation)` map and the execution
//! entry point.
//!
//! A session is mutated only while its mutex is held; `execute` takes the
//! lock for the whole call, so two executions on the same conversation
//! serialize while unrelated conversations proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{GlobalConfig, InstanceConfig};
use crate::models::message::ChatMessage;
use crate::orchestrator::injection::InjectionQueue;
use crate::orchestrator::{ExecutionEnv, Orchestrator, ProgressSink};
use crate::provider::ChatProvider;
use crate::session::hooks::{ApprovalHook, DisplayHook, HookCoordinator};
use crate::session::transcript::{transcript_path, TranscriptStore};
use crate::tools::dispatch_worker::DispatchWorkerTool;
use crate::tools::task_store::TaskStore;
use crate::tools::todo::TodoTool;
use crate::workers::WorkerManager;
use crate::{AppError, Result};

/// Context and transcript owned by one session. Only reachable through
/// the session mutex.
pub struct SessionState {
    /// Ordered role-tagged message context.
    pub context: Vec<ChatMessage>,
    transcript: TranscriptStore,
}

impl SessionState {
    /// Append to the context and persist to the transcript (best-effort;
    /// a failed write never interrupts the conversation).
    pub async fn push(&mut self, message: ChatMessage) {
        if let Err(err) = self.transcript.append(&message).await {
            warn!(%err, "transcript append failed");
        }
        self.context.push(message);
    }
}

/// One `(instance, conversation)` session.
pub struct SessionHandle {
    pub instance: InstanceConfig,
    pub conversation_id: String,
    pub hooks: Arc<HookCoordinator>,
    notices: parking_lot::Mutex<Vec<String>>,
    state: Mutex<SessionState>,
}

impl SessionHandle {
    /// Enqueue a system-visible message for the *next* execute on this
    /// session. Distinct from injection: it must not hijack an ongoing
    /// run (which would keep the loop alive after a force-respond).
    pub fn queue_notice(&self, text: impl Into<String>) {
        self.notices.lock().push(text.into());
    }

    fn drain_notices(&self) -> Vec<String> {
        self.notices.lock().drain(..).collect()
    }
}

/// Per-execute collaborators supplied by the caller.
pub struct ExecuteOptions {
    pub progress: ProgressSink,
    pub display: Option<Arc<dyn DisplayHook>>,
    pub approval: Option<Arc<dyn ApprovalHook>>,
    pub cancel: CancellationToken,
    /// Steering queue; the caller keeps a clone to inject into.
    pub queue: InjectionQueue,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            progress: ProgressSink::none(),
            display: None,
            approval: None,
            cancel: CancellationToken::new(),
            queue: InjectionQueue::new(),
        }
    }
}

/// Map from `(instance, conversation)` to sessions, plus the loop runner.
pub struct SessionRegistry {
    config: Arc<GlobalConfig>,
    orchestrator: Orchestrator,
    workers: Arc<WorkerManager>,
    sessions: parking_lot::Mutex<HashMap<String, Arc<SessionHandle>>>,
}

fn session_key(instance: &str, conversation_id: &str) -> String {
    // Instance lookups are case-insensitive; keys must be too.
    format!("{}:{conversation_id}", instance.to_lowercase())
}

impl SessionRegistry {
    #[must_use]
    pub fn new(
        config: Arc<GlobalConfig>,
        provider: Arc<dyn ChatProvider>,
        workers: Arc<WorkerManager>,
    ) -> Arc<Self> {
        let orchestrator = Orchestrator::new(
            provider,
            config.max_iterations,
            config.force_respond_tools.clone(),
        );
        Arc::new(Self {
            config,
            orchestrator,
            workers,
            sessions: parking_lot::Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn config(&self) -> &Arc<GlobalConfig> {
        &self.config
    }

    /// Look up a live session without creating one.
    #[must_use]
    pub fn get(&self, instance: &str, conversation_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions
            .lock()
            .get(&session_key(instance, conversation_id))
            .cloned()
    }

    /// Idempotent session creation: loads the persisted transcript,
    /// mounts the hook coordinator and default tools, prepares the
    /// working directory.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Session` for unknown instances and `AppError::Io`
    /// when the working directory cannot be created.
    pub async fn get_or_create(
        self: &Arc<Self>,
        instance_name: &str,
        conversation_id: &str,
    ) -> Result<Arc<SessionHandle>> {
        let key = session_key(instance_name, conversation_id);
        if let Some(existing) = self.sessions.lock().get(&key) {
            return Ok(Arc::clone(existing));
        }

        let instance = self
            .config
            .instance(instance_name)
            .ok_or_else(|| {
                AppError::Session(format!("instance '{instance_name}' is not hosted here"))
            })?
            .clone();

        tokio::fs::create_dir_all(&instance.working_dir).await?;

        let transcript = TranscriptStore::new(transcript_path(
            &self.config.sessions_dir(),
            &instance.name,
            conversation_id,
        ));
        let context = transcript.replay().await;
        if !context.is_empty() {
            info!(
                instance = %instance.name,
                conversation_id,
                messages = context.len(),
                "restored session context from transcript"
            );
        }

        let hooks = Arc::new(HookCoordinator::new());
        hooks.mount_tool(Arc::new(TodoTool::new()));
        hooks.mount_tool(Arc::new(DispatchWorkerTool::new(
            Arc::downgrade(self),
            Arc::clone(&self.workers),
            Arc::new(TaskStore::new(instance.working_dir.join("TASKS.md"))),
            instance.name.clone(),
            conversation_id.to_owned(),
        )));

        let handle = Arc::new(SessionHandle {
            instance: instance.clone(),
            conversation_id: conversation_id.to_owned(),
            hooks,
            notices: parking_lot::Mutex::new(Vec::new()),
            state: Mutex::new(SessionState {
                context,
                transcript,
            }),
        });

        let mut sessions = self.sessions.lock();
        // Another task may have created the session while the transcript
        // loaded; the first insert wins.
        let entry = sessions
            .entry(key)
            .or_insert_with(|| Arc::clone(&handle));
        info!(
            instance = %instance.name,
            conversation_id,
            bundle = %instance.bundle,
            "session ready"
        );
        Ok(Arc::clone(entry))
    }

    /// Run one prompt to completion under the session's mutex.
    ///
    /// Queued notices are drained first: each becomes a system-visible
    /// context message ahead of the user prompt.
    ///
    /// # Errors
    ///
    /// Propagates session-creation and provider failures.
    pub async fn execute(
        self: &Arc<Self>,
        instance_name: &str,
        conversation_id: &str,
        prompt: &str,
        opts: ExecuteOptions,
    ) -> Result<String> {
        let session = self.get_or_create(instance_name, conversation_id).await?;

        if let Some(display) = opts.display {
            session.hooks.set_display(display);
        }
        if let Some(approval) = opts.approval {
            session.hooks.set_approval(approval);
        }

        let mut state = session.state.lock().await;

        for notice in session.drain_notices() {
            state.push(ChatMessage::system(notice)).await;
        }

        session.hooks.set_injector(opts.queue.clone());
        let env = ExecutionEnv {
            queue: opts.queue,
            progress: opts.progress,
            cancel: opts.cancel,
        };

        info!(
            instance = %instance_name,
            conversation_id,
            prompt = %prompt.chars().take(80).collect::<String>(),
            "executing"
        );
        let result = self
            .orchestrator
            .execute(&mut state, &session.hooks, prompt, &env)
            .await;
        session.hooks.clear_injector();

        result
    }

    /// Enqueue a system-visible message for the next `execute` on the
    /// target session. Used for worker-completion reports.
    ///
    /// # Errors
    ///
    /// Propagates session-creation failures.
    pub async fn notify(
        self: &Arc<Self>,
        instance_name: &str,
        conversation_id: &str,
        text: &str,
    ) -> Result<()> {
        let session = self.get_or_create(instance_name, conversation_id).await?;
        session.queue_notice(text);
        info!(instance = %instance_name, conversation_id, "notice queued");
        Ok(())
    }
}
