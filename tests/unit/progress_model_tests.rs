use hive_relay::models::progress::{extract_agent, extract_todos, TodoStatus};
use serde_json::json;

#[test]
fn todos_extract_from_object_arguments() {
    let args = json!({
        "action": "create",
        "todos": [
            {"content": "scan", "activeForm": "Scanning", "status": "in_progress"},
            {"content": "report", "status": "pending"},
        ],
    });
    let todos = extract_todos(&args).expect("todos parse");
    assert_eq!(todos.len(), 2);
    assert_eq!(todos[0].status, TodoStatus::InProgress);
    assert_eq!(todos[0].active_form, "Scanning");
    // activeForm is optional.
    assert_eq!(todos[1].active_form, "");
}

#[test]
fn todos_extract_from_json_string_arguments() {
    let args = json!({
        "todos": "[{\"content\": \"scan\", \"status\": \"completed\"}]",
    });
    let todos = extract_todos(&args).expect("todos parse");
    assert_eq!(todos.len(), 1);
    assert_eq!(todos[0].status, TodoStatus::Completed);
}

#[test]
fn todos_extract_when_whole_payload_is_a_string() {
    let args = json!("{\"todos\": [{\"content\": \"x\", \"status\": \"pending\"}]}");
    let todos = extract_todos(&args).expect("todos parse");
    assert_eq!(todos.len(), 1);
}

#[test]
fn malformed_todos_are_rejected_not_coerced() {
    assert!(extract_todos(&json!({"todos": "not json"})).is_none());
    assert!(extract_todos(&json!({"todos": [{"status": "pending"}]})).is_none());
    assert!(extract_todos(&json!(42)).is_none());
}

#[test]
fn agent_extracts_from_object_and_string() {
    assert_eq!(
        extract_agent(&json!({"agent": "researcher", "task": "dig"})),
        Some("researcher".to_owned())
    );
    assert_eq!(
        extract_agent(&json!("{\"agent\": \"writer\"}")),
        Some("writer".to_owned())
    );
    assert_eq!(extract_agent(&json!({"task": "dig"})), None);
}
