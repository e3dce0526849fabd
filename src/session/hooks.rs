//! Per-session hook coordinator.
//!
//! Holds the named capability lists mounted on a session: tools, event
//! hook handlers, the display and approval back-channels, and the running
//! orchestrator's inject handle. Mounts may happen post-creation —
//! connector tools bound to a live Slack client are mounted after
//! `get_or_create` so they close over the correct channel and thread.
//!
//! Handing this coordinator out as a late-bound lookup object (rather
//! than direct references) is what breaks the orchestrator ↔ tools cycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::orchestrator::injection::InjectionQueue;
use crate::tools::{Tool, ToolRegistry};
use crate::Result;

/// Hook firing points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    ToolPre,
    ToolPost,
    PromptSubmit,
    ProviderRequest,
    InjectionApplied,
}

/// Outcome of a hook handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    Continue,
    Deny,
}

/// Aggregate result of firing an event's handler chain.
#[derive(Debug, Clone)]
pub struct HookResult {
    pub action: HookAction,
    pub metadata: Option<Value>,
}

impl HookResult {
    #[must_use]
    pub fn cont() -> Self {
        Self {
            action: HookAction::Continue,
            metadata: None,
        }
    }

    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            action: HookAction::Deny,
            metadata: Some(Value::String(reason.into())),
        }
    }
}

/// A handler registered for one or more hook events.
#[async_trait]
pub trait HookHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, event: HookEvent, payload: &Value) -> HookResult;
}

/// Severity for display messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayLevel {
    Info,
    Warning,
    Error,
}

/// Back-channel for hook display messages. Fire-and-forget: a failed post
/// is logged, never raised — hooks must not block on Slack.
pub trait DisplayHook: Send + Sync {
    fn show_message(&self, text: &str, level: DisplayLevel, source: &str);
}

/// Back-channel for interactive approvals.
#[async_trait]
pub trait ApprovalHook: Send + Sync {
    /// Prompt the user and wait for a choice; expiry resolves to `default`.
    async fn request_approval(
        &self,
        prompt: &str,
        options: &[String],
        default: &str,
        timeout: Duration,
    ) -> Result<String>;
}

/// A named capability resolved through [`HookCoordinator::get_capability`].
#[derive(Clone)]
pub enum Capability {
    Inject(InjectionQueue),
    Display(Arc<dyn DisplayHook>),
    Approval(Arc<dyn ApprovalHook>),
    Tool(Arc<dyn Tool>),
}

#[derive(Default)]
struct CoordinatorInner {
    tools: ToolRegistry,
    hooks: HashMap<HookEvent, Vec<Arc<dyn HookHandler>>>,
    display: Option<Arc<dyn DisplayHook>>,
    approval: Option<Arc<dyn ApprovalHook>>,
    injector: Option<InjectionQueue>,
}

/// The per-session capability registry.
#[derive(Default)]
pub struct HookCoordinator {
    inner: RwLock<CoordinatorInner>,
}

impl HookCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mount_tool(&self, tool: Arc<dyn Tool>) {
        self.inner.write().tools.mount(tool);
    }

    pub fn mount_hook(&self, event: HookEvent, handler: Arc<dyn HookHandler>) {
        self.inner
            .write()
            .hooks
            .entry(event)
            .or_default()
            .push(handler);
    }

    pub fn set_display(&self, display: Arc<dyn DisplayHook>) {
        self.inner.write().display = Some(display);
    }

    pub fn set_approval(&self, approval: Arc<dyn ApprovalHook>) {
        self.inner.write().approval = Some(approval);
    }

    /// Install the running execution's inject handle. Cleared at call end.
    pub fn set_injector(&self, queue: InjectionQueue) {
        self.inner.write().injector = Some(queue);
    }

    pub fn clear_injector(&self) {
        self.inner.write().injector = None;
    }

    /// Snapshot of the mounted tools as seen by the next provider request.
    #[must_use]
    pub fn tools(&self) -> ToolRegistry {
        self.inner.read().tools.clone()
    }

    #[must_use]
    pub fn display(&self) -> Option<Arc<dyn DisplayHook>> {
        self.inner.read().display.clone()
    }

    #[must_use]
    pub fn approval(&self) -> Option<Arc<dyn ApprovalHook>> {
        self.inner.read().approval.clone()
    }

    /// Resolve a capability by name: `orchestrator.inject`, `display`,
    /// `approval`, or a mounted tool's name.
    #[must_use]
    pub fn get_capability(&self, name: &str) -> Option<Capability> {
        let inner = self.inner.read();
        match name {
            "orchestrator.inject" => inner.injector.clone().map(Capability::Inject),
            "display" => inner.display.clone().map(Capability::Display),
            "approval" => inner.approval.clone().map(Capability::Approval),
            other => inner.tools.get(other).map(Capability::Tool),
        }
    }

    /// Fire all handlers for an event in mount order. The first `deny`
    /// short-circuits the chain.
    pub async fn fire(&self, event: HookEvent, payload: &Value) -> HookResult {
        let handlers: Vec<Arc<dyn HookHandler>> = {
            let inner = self.inner.read();
            inner.hooks.get(&event).cloned().unwrap_or_default()
        };
        for handler in handlers {
            let result = handler.handle(event, payload).await;
            if result.action == HookAction::Deny {
                return result;
            }
        }
        HookResult::cont()
    }
}
