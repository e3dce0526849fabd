use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use hive_relay::models::message::ToolOutput;
use hive_relay::orchestrator::injection::InjectionQueue;
use hive_relay::session::hooks::{
    ApprovalHook, Capability, HookAction, HookCoordinator, HookEvent, HookHandler, HookResult,
};
use hive_relay::tools::Tool;

struct NamedTool(&'static str);

#[async_trait]
impl Tool for NamedTool {
    fn name(&self) -> &str {
        self.0
    }
    fn description(&self) -> &str {
        "test"
    }
    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _input: Value) -> ToolOutput {
        ToolOutput::ok("ok")
    }
}

struct AlwaysDeny;

#[async_trait]
impl HookHandler for AlwaysDeny {
    fn name(&self) -> &str {
        "always-deny"
    }
    async fn handle(&self, _event: HookEvent, _payload: &Value) -> HookResult {
        HookResult::deny("no")
    }
}

struct AlwaysContinue;

#[async_trait]
impl HookHandler for AlwaysContinue {
    fn name(&self) -> &str {
        "always-continue"
    }
    async fn handle(&self, _event: HookEvent, _payload: &Value) -> HookResult {
        HookResult::cont()
    }
}

struct FixedApproval;

#[async_trait]
impl ApprovalHook for FixedApproval {
    async fn request_approval(
        &self,
        _prompt: &str,
        _options: &[String],
        default: &str,
        _timeout: Duration,
    ) -> hive_relay::Result<String> {
        Ok(default.to_owned())
    }
}

#[tokio::test]
async fn fire_with_no_handlers_continues() {
    let coordinator = HookCoordinator::new();
    let result = coordinator.fire(HookEvent::ToolPre, &json!({})).await;
    assert_eq!(result.action, HookAction::Continue);
}

#[tokio::test]
async fn first_deny_short_circuits() {
    let coordinator = HookCoordinator::new();
    coordinator.mount_hook(HookEvent::ToolPre, Arc::new(AlwaysContinue));
    coordinator.mount_hook(HookEvent::ToolPre, Arc::new(AlwaysDeny));
    let result = coordinator.fire(HookEvent::ToolPre, &json!({})).await;
    assert_eq!(result.action, HookAction::Deny);
    assert_eq!(result.metadata, Some(json!("no")));
}

#[tokio::test]
async fn handlers_are_scoped_to_their_event() {
    let coordinator = HookCoordinator::new();
    coordinator.mount_hook(HookEvent::ToolPre, Arc::new(AlwaysDeny));
    let result = coordinator.fire(HookEvent::ToolPost, &json!({})).await;
    assert_eq!(result.action, HookAction::Continue);
}

#[test]
fn capability_lookup_resolves_injector_and_tools() {
    let coordinator = HookCoordinator::new();
    assert!(coordinator.get_capability("orchestrator.inject").is_none());

    let queue = InjectionQueue::new();
    coordinator.set_injector(queue.clone());
    match coordinator.get_capability("orchestrator.inject") {
        Some(Capability::Inject(handle)) => {
            handle.inject("steered");
            assert_eq!(queue.drain(), vec!["steered".to_owned()]);
        }
        _ => panic!("expected inject capability"),
    }

    coordinator.clear_injector();
    assert!(coordinator.get_capability("orchestrator.inject").is_none());

    coordinator.mount_tool(Arc::new(NamedTool("grep")));
    assert!(matches!(
        coordinator.get_capability("grep"),
        Some(Capability::Tool(_))
    ));
    assert!(coordinator.get_capability("missing").is_none());
}

#[test]
fn capability_lookup_resolves_approval() {
    let coordinator = HookCoordinator::new();
    assert!(coordinator.get_capability("approval").is_none());
    coordinator.set_approval(Arc::new(FixedApproval));
    assert!(matches!(
        coordinator.get_capability("approval"),
        Some(Capability::Approval(_))
    ));
}

#[test]
fn later_tool_mounts_shadow_earlier_ones_in_lookup() {
    let coordinator = HookCoordinator::new();
    coordinator.mount_tool(Arc::new(NamedTool("echo")));
    coordinator.mount_tool(Arc::new(NamedTool("echo")));
    let registry = coordinator.tools();
    assert_eq!(registry.len(), 2);
    // Specs deduplicate by name.
    assert_eq!(registry.specs().len(), 1);
}
