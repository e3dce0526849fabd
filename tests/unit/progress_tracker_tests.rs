use std::time::Duration;

use hive_relay::models::progress::{ProgressEvent, TodoItem, TodoStatus};
use hive_relay::orchestrator::injection::InjectionQueue;
use hive_relay::slack::progress::ProgressTracker;

fn tracker(queue: &InjectionQueue) -> ProgressTracker {
    ProgressTracker::new("alpha".to_owned(), queue.clone(), Duration::from_secs(2))
}

fn tool_start(name: &str, todos: Option<Vec<TodoItem>>) -> ProgressEvent {
    ProgressEvent::ToolStart {
        name: name.to_owned(),
        args_digest: String::new(),
        agent: None,
        todos,
    }
}

#[test]
fn starts_in_simple_mode_thinking() {
    let queue = InjectionQueue::new();
    let tracker = tracker(&queue);
    assert_eq!(tracker.render(), "⚙️ Thinking…");
}

#[test]
fn simple_mode_tracks_current_tool() {
    let queue = InjectionQueue::new();
    let mut tracker = tracker(&queue);
    tracker.apply(&tool_start("bash", None));
    assert_eq!(tracker.render(), "⚙️ Running command…");
}

#[test]
fn thinking_clears_current_tool() {
    let queue = InjectionQueue::new();
    let mut tracker = tracker(&queue);
    tracker.apply(&tool_start("bash", None));
    tracker.apply(&ProgressEvent::Thinking { iteration: 2 });
    assert_eq!(tracker.render(), "⚙️ Thinking…");
}

#[test]
fn queued_messages_appear_in_simple_mode() {
    let queue = InjectionQueue::new();
    let mut tracker = tracker(&queue);
    tracker.apply(&tool_start("grep", None));
    queue.inject("more");
    assert!(tracker.render().ends_with("· 1 message queued"));
}

#[test]
fn todo_payload_switches_to_plan_mode() {
    let queue = InjectionQueue::new();
    let mut tracker = tracker(&queue);
    let todos = vec![TodoItem {
        content: "scan".to_owned(),
        active_form: "Scanning".to_owned(),
        status: TodoStatus::InProgress,
    }];
    tracker.apply(&tool_start("todo", Some(todos)));
    let out = tracker.render();
    assert!(out.starts_with("⚙️ alpha"));
    assert!(out.contains("▸  *Scanning*"));
}

#[test]
fn plan_mode_is_one_way_within_an_execution() {
    let queue = InjectionQueue::new();
    let mut tracker = tracker(&queue);
    let todos = vec![TodoItem {
        content: "scan".to_owned(),
        active_form: String::new(),
        status: TodoStatus::Pending,
    }];
    tracker.apply(&tool_start("todo", Some(todos)));
    // A later tool without todos must not fall back to simple mode.
    tracker.apply(&tool_start("bash", None));
    assert!(tracker.render().contains("○  scan"));
}

#[test]
fn throttle_allows_first_update_then_blocks() {
    let queue = InjectionQueue::new();
    let mut tracker = tracker(&queue);
    assert!(tracker.ready_for_update());
    assert!(!tracker.ready_for_update());
}

#[tokio::test]
async fn throttle_reopens_after_window() {
    let queue = InjectionQueue::new();
    let mut tracker =
        ProgressTracker::new("alpha".to_owned(), queue.clone(), Duration::from_millis(50));
    assert!(tracker.ready_for_update());
    assert!(!tracker.ready_for_update());
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(tracker.ready_for_update());
}
