use hive_relay::models::onboarding::{OnboardingState, TIP_MID_EXECUTION};
use hive_relay::slack::onboarding::{has_cross_thread_reference, record_thread, response_suffix};

fn fresh() -> OnboardingState {
    OnboardingState::new("U1")
}

fn past_footer_phase(state: &mut OnboardingState) {
    for i in 0..4 {
        record_thread(state, &format!("C1:{i}"));
    }
}

// ── Thread recording ─────────────────────────────────────────────

#[test]
fn new_thread_returns_true_once() {
    let mut state = fresh();
    assert!(record_thread(&mut state, "C1:1.0"));
    assert!(!record_thread(&mut state, "C1:1.0"));
    assert_eq!(state.threads_started, 1);
}

#[test]
fn recent_threads_capped_at_fifty() {
    let mut state = fresh();
    for i in 0..60 {
        record_thread(&mut state, &format!("C1:{i}"));
    }
    assert_eq!(state.recent_threads.len(), 50);
    assert_eq!(state.threads_started, 60);
    // Oldest entries fall off first.
    assert!(!state.recent_threads.contains(&"C1:0".to_owned()));
    assert!(state.recent_threads.contains(&"C1:59".to_owned()));
}

// ── Cross-thread reference detection ─────────────────────────────

#[test]
fn detects_backward_references() {
    assert!(has_cross_thread_reference("as I mentioned yesterday"));
    assert!(has_cross_thread_reference("remember when we set this up?"));
    assert!(has_cross_thread_reference("you said it was fine"));
    assert!(has_cross_thread_reference("continuing from our earlier chat"));
}

#[test]
fn no_false_positive_on_plain_text() {
    assert!(!has_cross_thread_reference("what's the capital of France?"));
    assert!(!has_cross_thread_reference("remember the milk"));
}

// ── Suffix priority ──────────────────────────────────────────────

#[test]
fn thread_footer_on_first_three_threads() {
    let mut state = fresh();
    for i in 0..3 {
        record_thread(&mut state, &format!("C1:{i}"));
        let suffix = response_suffix(&mut state, true, 0, false);
        assert!(suffix.contains("New thread, fresh start"), "thread {i}");
    }
}

#[test]
fn no_footer_after_three_threads() {
    let mut state = fresh();
    past_footer_phase(&mut state);
    let suffix = response_suffix(&mut state, true, 0, false);
    assert!(!suffix.contains("New thread, fresh start"));
}

#[test]
fn cross_thread_note_supersedes_footer() {
    let mut state = fresh();
    record_thread(&mut state, "C1:1");
    let suffix = response_suffix(&mut state, true, 0, true);
    assert!(suffix.contains("each thread is its own conversation"));
    assert_eq!(state.cross_thread_notes_shown, 1);
}

#[test]
fn cross_thread_note_capped_at_three() {
    let mut state = fresh();
    past_footer_phase(&mut state);
    for _ in 0..3 {
        let suffix = response_suffix(&mut state, true, 0, true);
        assert!(suffix.contains("each thread is its own conversation"));
    }
    // Fourth time: falls through to the next applicable tip instead.
    let suffix = response_suffix(&mut state, true, 0, true);
    assert!(!suffix.contains("each thread is its own conversation"));
}

#[test]
fn regenerate_tip_then_file_tip_on_new_threads() {
    let mut state = fresh();
    past_footer_phase(&mut state);

    let first = response_suffix(&mut state, true, 0, false);
    assert!(first.contains("arrows_counterclockwise"));

    let second = response_suffix(&mut state, true, 0, false);
    assert!(second.contains("drop files into the thread"));
}

#[test]
fn mid_execution_tip_on_long_response_after_footer_phase() {
    let mut state = fresh();
    past_footer_phase(&mut state);
    let suffix = response_suffix(&mut state, false, 25, false);
    assert!(suffix.contains("hourglass_flowing_sand"));
    assert!(state.tip_shown(TIP_MID_EXECUTION));

    // Only once ever.
    let again = response_suffix(&mut state, false, 25, false);
    assert!(again.is_empty());
}

#[test]
fn no_mid_execution_tip_during_footer_phase() {
    let mut state = fresh();
    record_thread(&mut state, "C1:1");
    let suffix = response_suffix(&mut state, false, 25, false);
    assert!(!suffix.contains("hourglass_flowing_sand"));
}

#[test]
fn no_tips_for_old_threads_after_counts_exhaust() {
    let mut state = fresh();
    past_footer_phase(&mut state);
    let _ = response_suffix(&mut state, true, 0, false); // regenerate
    let _ = response_suffix(&mut state, true, 0, false); // file upload
    let _ = response_suffix(&mut state, false, 30, false); // mid-execution

    // The system has dissolved.
    assert!(response_suffix(&mut state, true, 30, false).is_empty());
    assert!(response_suffix(&mut state, false, 5, false).is_empty());
}

#[test]
fn old_thread_gets_no_count_based_tip() {
    let mut state = fresh();
    past_footer_phase(&mut state);
    let suffix = response_suffix(&mut state, false, 0, false);
    assert!(suffix.is_empty());
}

// ── State model ──────────────────────────────────────────────────

#[test]
fn normalize_backfills_missing_tip_keys() {
    let mut state = fresh();
    state.tips_shown.clear();
    state.normalize();
    assert!(state.tips_shown.contains_key("regenerate"));
    assert!(state.tips_shown.contains_key("file_upload"));
    assert!(state.tips_shown.contains_key("mid_execution"));
}

#[test]
fn state_round_trips_through_json() {
    let mut state = fresh();
    record_thread(&mut state, "C1:1");
    state.mark_tip(TIP_MID_EXECUTION);
    let raw = serde_json::to_string(&state).expect("serialize");
    let back: OnboardingState = serde_json::from_str(&raw).expect("deserialize");
    assert_eq!(back, state);
}
