//! Approval back-channel: button posts, correlation-keyed resolution,
//! and timeout defaults.

use std::sync::Arc;
use std::time::Duration;

use hive_relay::session::hooks::ApprovalHook;
use hive_relay::slack::approval::{ApprovalLedger, SlackApprovalSystem};
use hive_relay::slack::gateway::PostIdentity;

use super::test_helpers::{GatewayCall, MockGateway};

fn options() -> Vec<String> {
    vec!["Yes".to_owned(), "No".to_owned()]
}

fn approval_system(
    gateway: &Arc<MockGateway>,
    ledger: &Arc<ApprovalLedger>,
) -> SlackApprovalSystem {
    SlackApprovalSystem::new(
        Arc::clone(gateway) as _,
        Arc::clone(ledger),
        "C1".to_owned(),
        Some("1.0".to_owned()),
    )
}

fn posted_buttons(gateway: &MockGateway) -> Vec<(String, String)> {
    gateway
        .recorded()
        .iter()
        .filter_map(|call| match call {
            GatewayCall::Post { message, .. } if !message.buttons.is_empty() => Some(
                message
                    .buttons
                    .iter()
                    .map(|b| (b.action_id.clone(), b.value.clone()))
                    .collect::<Vec<_>>(),
            ),
            _ => None,
        })
        .flatten()
        .collect()
}

#[tokio::test]
async fn click_resolves_to_chosen_option() {
    let gateway = MockGateway::new();
    let ledger = Arc::new(ApprovalLedger::new());
    let system = approval_system(&gateway, &ledger);

    let resolver = {
        let gateway = Arc::clone(&gateway);
        let ledger = Arc::clone(&ledger);
        tokio::spawn(async move {
            // Wait for the button post, then click "Yes".
            for _ in 0..100 {
                let buttons = posted_buttons(&gateway);
                if let Some((action_id, value)) = buttons.first() {
                    let correlation =
                        ApprovalLedger::correlation_from_action_id(action_id).expect("correlation");
                    assert!(ledger.resolve(correlation, value));
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("approval message never posted");
        })
    };

    let chosen = system
        .request_approval("Apply the change?", &options(), "No", Duration::from_secs(5))
        .await
        .expect("approval");

    resolver.await.expect("resolver");
    assert_eq!(chosen, "Yes");

    // The message was edited in place to show the resolution.
    let updates: Vec<String> = gateway
        .recorded()
        .iter()
        .filter_map(|call| match call {
            GatewayCall::Update { text, .. } => Some(text.clone()),
            _ => None,
        })
        .collect();
    assert!(updates.iter().any(|t| t.contains("*Selected: Yes*")));
}

#[tokio::test]
async fn timeout_resolves_to_default_and_marks_message() {
    let gateway = MockGateway::new();
    let ledger = Arc::new(ApprovalLedger::new());
    let system = approval_system(&gateway, &ledger);

    let chosen = system
        .request_approval(
            "Apply the change?",
            &options(),
            "No",
            Duration::from_millis(100),
        )
        .await
        .expect("approval");

    assert_eq!(chosen, "No");
    let updates: Vec<String> = gateway
        .recorded()
        .iter()
        .filter_map(|call| match call {
            GatewayCall::Update { text, .. } => Some(text.clone()),
            _ => None,
        })
        .collect();
    assert!(updates.iter().any(|t| t.contains("No (default)")));
}

#[tokio::test]
async fn approval_message_posts_one_button_per_option() {
    let gateway = MockGateway::new();
    let ledger = Arc::new(ApprovalLedger::new());
    let system = approval_system(&gateway, &ledger);

    let _ = system
        .request_approval("Pick one", &options(), "No", Duration::from_millis(50))
        .await;

    let buttons = posted_buttons(&gateway);
    assert_eq!(buttons.len(), 2);
    assert_eq!(buttons[0].1, "Yes");
    assert_eq!(buttons[1].1, "No");
    // The prompt posts under the bot identity so it stays editable.
    let (message, _) = &gateway.bot_posts()[0];
    assert_eq!(message.identity, PostIdentity::Bot);
}

#[tokio::test]
async fn concurrent_approvals_do_not_cross() {
    let gateway = MockGateway::new();
    let ledger = Arc::new(ApprovalLedger::new());
    let system_a = approval_system(&gateway, &ledger);
    let system_b = approval_system(&gateway, &ledger);

    let a = tokio::spawn(async move {
        system_a
            .request_approval("first?", &options(), "No", Duration::from_secs(5))
            .await
    });
    let b = tokio::spawn(async move {
        system_b
            .request_approval("second?", &options(), "No", Duration::from_secs(5))
            .await
    });

    // Wait until both button sets are up, then answer them differently.
    let mut buttons = Vec::new();
    for _ in 0..100 {
        buttons = posted_buttons(&gateway);
        if buttons.len() >= 4 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(buttons.len() >= 4, "both approval messages posted");

    let first_correlation =
        ApprovalLedger::correlation_from_action_id(&buttons[0].0).expect("correlation");
    let second_correlation =
        ApprovalLedger::correlation_from_action_id(&buttons[2].0).expect("correlation");
    assert_ne!(first_correlation, second_correlation);

    assert!(ledger.resolve(first_correlation, "Yes"));
    assert!(ledger.resolve(second_correlation, "No"));

    // Post order does not fix spawn order; assert each request resolved
    // to exactly one of the clicked options, not the timeout default path.
    let first = a.await.expect("join").expect("approval");
    let second = b.await.expect("join").expect("approval");
    let mut outcomes = vec![first, second];
    outcomes.sort();
    assert_eq!(outcomes, vec!["No".to_owned(), "Yes".to_owned()]);
}

#[tokio::test]
async fn unknown_correlation_resolution_is_rejected() {
    let ledger = ApprovalLedger::new();
    assert!(!ledger.resolve("deadbeef", "Yes"));
}

#[test]
fn correlation_parses_from_action_id() {
    assert_eq!(
        ApprovalLedger::correlation_from_action_id("approval_ab12cd34_0"),
        Some("ab12cd34")
    );
    assert_eq!(ApprovalLedger::correlation_from_action_id("prompt_x_1"), None);
    assert_eq!(ApprovalLedger::correlation_from_action_id("approval_lone"), None);
}
