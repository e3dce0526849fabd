use hive_relay::orchestrator::injection::{
    synthesize_injection, InjectionQueue, INJECTION_PREAMBLE,
};

#[test]
fn queue_preserves_arrival_order() {
    let queue = InjectionQueue::new();
    queue.inject("first");
    queue.inject("second");
    assert_eq!(queue.len(), 2);
    assert_eq!(queue.drain(), vec!["first".to_owned(), "second".to_owned()]);
    assert!(queue.is_empty());
}

#[test]
fn clones_share_the_same_queue() {
    let queue = InjectionQueue::new();
    let handle = queue.clone();
    handle.inject("via handle");
    assert_eq!(queue.drain(), vec!["via handle".to_owned()]);
}

#[test]
fn synthesized_message_carries_preamble_and_bullets() {
    let combined = synthesize_injection(&["also check tests".to_owned(), "and lint".to_owned()]);
    assert!(combined.starts_with(INJECTION_PREAMBLE));
    assert!(combined.contains("\n- also check tests"));
    assert!(combined.contains("\n- and lint"));
}

#[test]
fn preamble_mentions_mid_execution_additions() {
    assert!(INJECTION_PREAMBLE.contains("additional messages while you were working"));
    assert!(INJECTION_PREAMBLE.contains("Incorporate this into your current task"));
}
