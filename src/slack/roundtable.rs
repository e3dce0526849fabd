//! Roundtable executor: parallel fan-out across all instances with
//! `[PASS]` filtering and paced posting.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::InstanceConfig;
use crate::session::registry::{ExecuteOptions, SessionRegistry};

use super::formatting::markdown_to_slack;
use super::gateway::{OutboundMessage, SlackGateway};

/// Literal token an instance emits when it has nothing unique to add.
pub const PASS_TOKEN: &str = "[PASS]";

/// Slack allows one post per second per channel; the extra half-second
/// gives headroom and visual pacing.
const POST_PACING: Duration = Duration::from_millis(1500);

/// Case-insensitive check for a leading `[PASS]`.
#[must_use]
pub fn is_pass(text: &str) -> bool {
    text.trim_start()
        .get(..PASS_TOKEN.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(PASS_TOKEN))
}

/// Wrap the user prompt with the roundtable preamble for one instance.
#[must_use]
pub fn roundtable_prompt(me: &str, all_instances: &[String], prompt: &str) -> String {
    let others: Vec<&str> = all_instances
        .iter()
        .filter(|name| !name.eq_ignore_ascii_case(me))
        .map(String::as_str)
        .collect();
    format!(
        "[Roundtable mode: this message goes to every instance in parallel. \
         You are {me}; the other instances are {}. Each of you answers \
         independently. If you have nothing unique to add, reply with \
         exactly {PASS_TOKEN}.]\n\n{prompt}",
        others.join(", "),
    )
}

/// A surviving roundtable response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundtableResponse {
    pub instance: String,
    pub text: String,
}

/// Fan a prompt out to every participating instance, collect responses,
/// and drop errors and `[PASS]` answers. Partial results are still useful.
pub async fn collect_responses(
    registry: &Arc<SessionRegistry>,
    participants: &[InstanceConfig],
    conversation_id: &str,
    prompt: &str,
) -> Vec<RoundtableResponse> {
    let names: Vec<String> = participants.iter().map(|i| i.name.clone()).collect();

    let executions = participants.iter().map(|instance| {
        let wrapped = roundtable_prompt(&instance.name, &names, prompt);
        let registry = Arc::clone(registry);
        let name = instance.name.clone();
        let conversation_id = conversation_id.to_owned();
        async move {
            let result = registry
                .execute(&name, &conversation_id, &wrapped, ExecuteOptions::default())
                .await;
            (name, result)
        }
    });

    let mut responses = Vec::new();
    for (name, result) in join_all(executions).await {
        match result {
            Ok(text) => {
                if is_pass(&text) {
                    info!(instance = %name, "roundtable pass");
                } else if text.trim().is_empty() {
                    info!(instance = %name, "roundtable empty response dropped");
                } else {
                    responses.push(RoundtableResponse {
                        instance: name,
                        text,
                    });
                }
            }
            Err(err) => {
                warn!(instance = %name, %err, "roundtable execution failed; dropping");
            }
        }
    }
    responses
}

/// Post surviving responses sequentially under each instance's persona,
/// pausing between posts.
pub async fn post_responses(
    gateway: &Arc<dyn SlackGateway>,
    participants: &[InstanceConfig],
    responses: &[RoundtableResponse],
    channel: &str,
    thread_ts: &str,
) {
    for (index, response) in responses.iter().enumerate() {
        if index > 0 {
            sleep(POST_PACING).await;
        }
        let persona = participants
            .iter()
            .find(|i| i.name == response.instance)
            .map(|i| i.persona.clone());
        let Some(persona) = persona else { continue };

        let message = OutboundMessage::persona(
            channel,
            Some(thread_ts.to_owned()),
            markdown_to_slack(&response.text),
            persona.name,
            persona.emoji,
        );
        if let Err(err) = gateway.post_message(message).await {
            warn!(instance = %response.instance, %err, "roundtable post failed");
        }
    }
}
