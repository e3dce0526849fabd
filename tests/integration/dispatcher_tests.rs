//! End-to-end dispatcher flows against the in-memory gateway: routing,
//! status lifecycle, mid-execution steering, roundtable, summon,
//! regenerate, and cancellation.

use std::sync::Arc;
use std::time::Duration;

use hive_relay::slack::dispatcher::{Dispatcher, InboundMessage, InboundReaction};
use hive_relay::slack::gateway::{FetchedMessage, SlackGateway};
use hive_relay::slack::routing::ROUNDTABLE_OWNER;

use super::test_helpers::{
    make_registry, test_config, text_response, MockGateway, ScriptedProvider,
};

const WAIT: Duration = Duration::from_secs(5);

fn message(channel: &str, user: &str, text: &str, ts: &str) -> InboundMessage {
    InboundMessage {
        channel: channel.to_owned(),
        user: user.to_owned(),
        text: text.to_owned(),
        ts: ts.to_owned(),
        thread_ts: None,
        files: Vec::new(),
        is_dm: false,
        is_bot: false,
        is_mention: false,
    }
}

fn build_dispatcher(
    dir: &tempfile::TempDir,
    provider: Arc<ScriptedProvider>,
    gateway: &Arc<MockGateway>,
) -> Arc<Dispatcher> {
    let config = Arc::new(test_config(dir.path()));
    let registry = make_registry(Arc::clone(&config), provider);
    Dispatcher::new(
        config,
        registry,
        Arc::clone(gateway) as Arc<dyn SlackGateway>,
    )
}

async fn wait_for_persona_posts(gateway: &Arc<MockGateway>, count: usize) -> bool {
    super::test_helpers::wait_until(|| gateway.persona_posts().len() >= count, WAIT).await
}

async fn wait_for_idle(dispatcher: &Arc<Dispatcher>, conversation_id: &str) -> bool {
    super::test_helpers::wait_until(|| !dispatcher.is_busy(conversation_id), WAIT).await
}

// ── Scenario: single-instance forced channel ─────────────────────

#[tokio::test]
async fn forced_channel_routes_and_posts_persona_response() {
    let dir = tempfile::tempdir().expect("tempdir");
    let gateway = MockGateway::new();
    gateway.set_topic("C1", "general", "[instance:alpha]");
    let provider = ScriptedProvider::new(vec![text_response("Hello")]);
    let dispatcher = build_dispatcher(&dir, provider.clone(), &gateway);

    dispatcher.handle_message(message("C1", "U1", "hi", "1.0")).await;

    assert!(wait_for_persona_posts(&gateway, 1).await, "persona post expected");
    assert!(wait_for_idle(&dispatcher, "C1:1.0").await);

    // The final response carries the persona and the response text.
    let (post, _) = &gateway.persona_posts()[0];
    assert!(post.text.starts_with("Hello"));
    assert_eq!(post.thread_ts.as_deref(), Some("1.0"));

    // Status message lifecycle: one bot-identity status post, deleted at the end.
    let bot_posts = gateway.bot_posts();
    let status = bot_posts
        .iter()
        .find(|(m, _)| m.channel == "C1")
        .expect("status message posted");
    assert!(gateway.deletes().contains(&status.1));

    // Hourglass added and removed on the user's message.
    assert!(gateway
        .reactions_added()
        .contains(&("1.0".to_owned(), "hourglass_flowing_sand".to_owned())));
    assert!(gateway
        .reactions_removed()
        .contains(&("1.0".to_owned(), "hourglass_flowing_sand".to_owned())));

    // Thread ownership recorded.
    assert_eq!(dispatcher.thread_owner("C1:1.0").as_deref(), Some("alpha"));

    // The executed prompt was the raw text.
    assert_eq!(provider.calls()[0].messages.last().unwrap().content, "hi");
}

#[tokio::test]
async fn untargeted_channel_message_is_ignored() {
    let dir = tempfile::tempdir().expect("tempdir");
    let gateway = MockGateway::new();
    gateway.set_topic("C1", "general", "a plain topic");
    let provider = ScriptedProvider::new(vec![text_response("should not run")]);
    let dispatcher = build_dispatcher(&dir, provider.clone(), &gateway);

    dispatcher
        .handle_message(message("C1", "U1", "just chatting", "1.0"))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(provider.call_count(), 0);
    assert!(gateway.persona_posts().is_empty());
}

#[tokio::test]
async fn explicit_prefix_routes_and_takes_ownership() {
    let dir = tempfile::tempdir().expect("tempdir");
    let gateway = MockGateway::new();
    gateway.set_topic("C1", "general", "");
    let provider = ScriptedProvider::new(vec![
        text_response("beta here"),
        text_response("beta again"),
    ]);
    let dispatcher = build_dispatcher(&dir, provider.clone(), &gateway);

    dispatcher
        .handle_message(message("C1", "U1", "beta: take this", "1.0"))
        .await;
    assert!(wait_for_persona_posts(&gateway, 1).await);
    assert!(wait_for_idle(&dispatcher, "C1:1.0").await);
    assert_eq!(dispatcher.thread_owner("C1:1.0").as_deref(), Some("beta"));

    // A bare follow-up in the same thread routes to the owner.
    let mut followup = message("C1", "U1", "and this too", "2.0");
    followup.thread_ts = Some("1.0".to_owned());
    dispatcher.handle_message(followup).await;
    assert!(wait_for_persona_posts(&gateway, 2).await);

    let calls = provider.calls();
    assert_eq!(calls[0].messages.last().unwrap().content, "take this");
    assert!(calls[1]
        .messages
        .last()
        .unwrap()
        .content
        .contains("and this too"));
}

#[tokio::test]
async fn duplicate_delivery_executes_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let gateway = MockGateway::new();
    gateway.set_topic("C1", "general", "[instance:alpha]");
    let provider = ScriptedProvider::new(vec![text_response("once"), text_response("twice")]);
    let dispatcher = build_dispatcher(&dir, provider.clone(), &gateway);

    dispatcher.handle_message(message("C1", "U1", "hi", "1.0")).await;
    dispatcher.handle_message(message("C1", "U1", "hi", "1.0")).await;
    assert!(wait_for_persona_posts(&gateway, 1).await);
    assert!(wait_for_idle(&dispatcher, "C1:1.0").await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(provider.call_count(), 1);
}

// ── Scenario: mid-execution steering ─────────────────────────────

#[tokio::test]
async fn second_message_injects_into_running_execution() {
    let dir = tempfile::tempdir().expect("tempdir");
    let gateway = MockGateway::new();
    gateway.set_topic("C1", "general", "[instance:alpha]");
    let provider = ScriptedProvider::with_delays(vec![
        (text_response("analysis done"), Duration::from_millis(400)),
        (text_response("tests checked too"), Duration::ZERO),
    ]);
    let dispatcher = build_dispatcher(&dir, provider.clone(), &gateway);

    dispatcher
        .handle_message(message("C1", "U1", "analyze repo", "1.0"))
        .await;
    // Let the execution reach the provider call, then steer it.
    assert!(
        super::test_helpers::wait_until(|| provider.call_count() == 1, WAIT).await,
        "first provider call in flight"
    );
    let mut steer = message("C1", "U1", "also check tests", "2.0");
    steer.thread_ts = Some("1.0".to_owned());
    dispatcher.handle_message(steer).await;

    assert!(wait_for_idle(&dispatcher, "C1:1.0").await);

    // The steering message got the envelope reaction, no second execution
    // started, and the queue drained into the same run.
    assert!(gateway
        .reactions_added()
        .contains(&("2.0".to_owned(), "incoming_envelope".to_owned())));
    assert_eq!(gateway.persona_posts().len(), 1);
    let calls = provider.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[1]
        .messages
        .iter()
        .any(|m| m.content.contains("also check tests")));
}

// ── Scenario: roundtable ─────────────────────────────────────────

#[tokio::test]
async fn roundtable_with_all_pass_posts_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let gateway = MockGateway::new();
    gateway.set_topic("C1", "round", "[mode:roundtable]");
    let provider = ScriptedProvider::new(vec![
        text_response("[PASS]"),
        text_response("[PASS] nothing to add"),
    ]);
    let dispatcher = build_dispatcher(&dir, provider.clone(), &gateway);

    dispatcher
        .handle_message(message("C1", "U1", "thanks!", "1.0"))
        .await;
    assert!(wait_for_idle(&dispatcher, "C1:1.0").await);
    assert!(
        super::test_helpers::wait_until(|| !gateway.deletes().is_empty(), WAIT).await,
        "status deleted"
    );

    assert!(gateway.persona_posts().is_empty());
    assert!(gateway
        .reactions_removed()
        .contains(&("1.0".to_owned(), "hourglass_flowing_sand".to_owned())));
    assert_eq!(
        dispatcher.thread_owner("C1:1.0").as_deref(),
        Some(ROUNDTABLE_OWNER)
    );
}

#[tokio::test]
async fn roundtable_survivors_post_with_personas() {
    let dir = tempfile::tempdir().expect("tempdir");
    let gateway = MockGateway::new();
    gateway.set_topic("C1", "round", "[mode:roundtable]");
    let provider = ScriptedProvider::new(vec![
        text_response("shared view"),
        text_response("shared view"),
    ]);
    let dispatcher = build_dispatcher(&dir, provider.clone(), &gateway);

    dispatcher
        .handle_message(message("C1", "U1", "what next?", "1.0"))
        .await;
    assert!(wait_for_persona_posts(&gateway, 2).await);
    assert!(wait_for_idle(&dispatcher, "C1:1.0").await);
}

#[tokio::test]
async fn explicit_address_in_roundtable_channel_routes_single() {
    let dir = tempfile::tempdir().expect("tempdir");
    let gateway = MockGateway::new();
    gateway.set_topic("C1", "round", "[mode:roundtable]");
    let provider = ScriptedProvider::new(vec![text_response("just beta")]);
    let dispatcher = build_dispatcher(&dir, provider.clone(), &gateway);

    dispatcher
        .handle_message(message("C1", "U1", "beta: your take only", "1.0"))
        .await;
    assert!(wait_for_persona_posts(&gateway, 1).await);

    let (post, _) = &gateway.persona_posts()[0];
    match &post.identity {
        hive_relay::slack::gateway::PostIdentity::Persona { username, .. } => {
            assert_eq!(username, "Beta");
        }
        other => panic!("expected persona identity, got {other:?}"),
    }
    assert_eq!(provider.call_count(), 1);
}

// ── Scenario: summon ─────────────────────────────────────────────

#[tokio::test]
async fn emoji_summon_executes_with_preamble() {
    let dir = tempfile::tempdir().expect("tempdir");
    let gateway = MockGateway::new();
    gateway.set_topic("C1", "chan", "");
    gateway.set_history(
        "C1",
        "5.0",
        FetchedMessage {
            text: "Use Redis here".to_owned(),
            user: Some("U9".to_owned()),
            is_bot: false,
        },
    );
    let provider = ScriptedProvider::new(vec![text_response("Redis it is")]);
    let dispatcher = build_dispatcher(&dir, provider.clone(), &gateway);

    dispatcher
        .handle_reaction(InboundReaction {
            channel: "C1".to_owned(),
            user: "U2".to_owned(),
            reaction: "beta".to_owned(),
            message_ts: "5.0".to_owned(),
            item_is_own: false,
        })
        .await;

    assert!(wait_for_persona_posts(&gateway, 1).await);
    let prompt = provider.calls()[0].messages.last().unwrap().content.clone();
    assert_eq!(
        prompt,
        "[<@U2> summoned you by reacting with :beta: to this message in #chan]\nUse Redis here"
    );
    let (post, _) = &gateway.persona_posts()[0];
    assert_eq!(post.thread_ts.as_deref(), Some("5.0"));
}

#[tokio::test]
async fn duplicate_summon_executes_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let gateway = MockGateway::new();
    gateway.set_topic("C1", "chan", "");
    gateway.set_history(
        "C1",
        "5.0",
        FetchedMessage {
            text: "ping".to_owned(),
            user: Some("U9".to_owned()),
            is_bot: false,
        },
    );
    let provider = ScriptedProvider::new(vec![text_response("pong"), text_response("pong2")]);
    let dispatcher = build_dispatcher(&dir, provider.clone(), &gateway);

    let reaction = InboundReaction {
        channel: "C1".to_owned(),
        user: "U2".to_owned(),
        reaction: "alpha".to_owned(),
        message_ts: "5.0".to_owned(),
        item_is_own: false,
    };
    dispatcher.handle_reaction(reaction.clone()).await;
    dispatcher.handle_reaction(reaction).await;

    assert!(wait_for_persona_posts(&gateway, 1).await);
    assert!(wait_for_idle(&dispatcher, "summon:alpha:5.0").await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(provider.call_count(), 1);
}

// ── Scenario: regenerate ─────────────────────────────────────────

#[tokio::test]
async fn regenerate_reaction_reexecutes_original_prompt() {
    let dir = tempfile::tempdir().expect("tempdir");
    let gateway = MockGateway::new();
    gateway.set_topic("C1", "general", "[instance:alpha]");
    let provider = ScriptedProvider::new(vec![
        text_response("first take"),
        text_response("fresh take"),
    ]);
    let dispatcher = build_dispatcher(&dir, provider.clone(), &gateway);

    dispatcher
        .handle_message(message("C1", "U1", "explain this", "1.0"))
        .await;
    assert!(wait_for_persona_posts(&gateway, 1).await);
    assert!(wait_for_idle(&dispatcher, "C1:1.0").await);
    let (_, response_ts) = gateway.persona_posts()[0].clone();

    dispatcher
        .handle_reaction(InboundReaction {
            channel: "C1".to_owned(),
            user: "U1".to_owned(),
            reaction: "arrows_counterclockwise".to_owned(),
            message_ts: response_ts,
            item_is_own: true,
        })
        .await;

    assert!(wait_for_persona_posts(&gateway, 2).await);
    let calls = provider.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[1]
        .messages
        .iter()
        .filter(|m| m.content == "explain this")
        .count() >= 2, "the original prompt was re-executed in the same session");
}

// ── Scenario: cancellation ───────────────────────────────────────

#[tokio::test]
async fn cancel_reaction_on_status_message_stops_execution() {
    let dir = tempfile::tempdir().expect("tempdir");
    let gateway = MockGateway::new();
    gateway.set_topic("C1", "general", "[instance:alpha]");
    let provider = ScriptedProvider::with_delays(vec![(
        text_response("slow answer"),
        Duration::from_millis(500),
    )]);
    let dispatcher = build_dispatcher(&dir, provider.clone(), &gateway);

    dispatcher
        .handle_message(message("C1", "U1", "big job", "1.0"))
        .await;
    // Find the status message once it exists.
    assert!(
        super::test_helpers::wait_until(
            || gateway
                .bot_posts()
                .iter()
                .any(|(m, _)| m.text.contains("Thinking")),
            WAIT
        )
        .await
    );
    let status_ts = gateway
        .bot_posts()
        .iter()
        .find(|(m, _)| m.text.contains("Thinking"))
        .map(|(_, ts)| ts.clone())
        .expect("status ts");

    dispatcher
        .handle_reaction(InboundReaction {
            channel: "C1".to_owned(),
            user: "U1".to_owned(),
            reaction: "x".to_owned(),
            message_ts: status_ts.clone(),
            item_is_own: true,
        })
        .await;

    assert!(wait_for_idle(&dispatcher, "C1:1.0").await);
    // The discarded response never posts; cleanup still happens.
    assert!(gateway.persona_posts().is_empty());
    assert!(gateway.deletes().contains(&status_ts));
    assert!(gateway
        .reactions_removed()
        .contains(&("1.0".to_owned(), "hourglass_flowing_sand".to_owned())));
}

// ── DMs ──────────────────────────────────────────────────────────

#[tokio::test]
async fn dm_routes_to_default_instance() {
    let dir = tempfile::tempdir().expect("tempdir");
    let gateway = MockGateway::new();
    let provider = ScriptedProvider::new(vec![text_response("dm reply")]);
    let dispatcher = build_dispatcher(&dir, provider.clone(), &gateway);

    let mut dm = message("D123", "U1", "hello there", "1.0");
    dm.is_dm = true;
    dispatcher.handle_message(dm).await;

    assert!(wait_for_persona_posts(&gateway, 1).await);
    assert!(wait_for_idle(&dispatcher, "dm:U1").await);
    let calls = provider.calls();
    assert_eq!(calls[0].messages.last().unwrap().content, "hello there");
}
