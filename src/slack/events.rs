//! Socket Mode event handlers: normalize slack_morphism payloads and hand
//! them to the dispatcher.
//!
//! Handlers never block the transport — anything beyond classification is
//! spawned, and duplicate deliveries are dropped by the dispatcher's
//! seen-set (a mention in a channel arrives both as `message` and
//! `app_mention`; the second delivery deduplicates away).

use std::sync::Arc;

use slack_morphism::prelude::{
    SlackClient, SlackClientEventsUserState, SlackClientHyperHttpsConnector,
    SlackEventCallbackBody, SlackInteractionEvent, SlackPushEventCallback, SlackReactionsItem,
};
use tracing::{debug, warn};

use crate::slack::dispatcher::{Dispatcher, InboundMessage, InboundReaction};
use crate::slack::files::SharedFile;

async fn dispatcher_from_state(state: &SlackClientEventsUserState) -> Option<Arc<Dispatcher>> {
    let guard = state.read().await;
    guard.get_user_state::<Arc<Dispatcher>>().cloned()
}

/// Handle push events (messages, mentions, reactions) from Socket Mode.
///
/// # Errors
///
/// Never fails; malformed payloads are logged and dropped.
pub async fn handle_push(
    event: SlackPushEventCallback,
    _client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    state: SlackClientEventsUserState,
) -> slack_morphism::UserCallbackResult<()> {
    let Some(dispatcher) = dispatcher_from_state(&state).await else {
        warn!("dispatcher not available; dropping push event");
        return Ok(());
    };

    match event.event {
        SlackEventCallbackBody::Message(message) => {
            let Some(channel) = message.origin.channel else {
                return Ok(());
            };
            let channel_type = message
                .origin
                .channel_type
                .as_ref()
                .map(|t| t.to_string())
                .unwrap_or_default();

            let files = message
                .content
                .as_ref()
                .and_then(|content| content.files.as_ref())
                .map(|files| {
                    files
                        .iter()
                        .filter_map(|file| {
                            Some(SharedFile {
                                name: file.name.clone()?,
                                size: 0u64, // TEMP-SURVEY-ONLY
                                url_private: file.url_private.as_ref()?.to_string(),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();

            let inbound = InboundMessage {
                channel: channel.to_string(),
                user: message
                    .sender
                    .user
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
                text: message
                    .content
                    .as_ref()
                    .and_then(|content| content.text.clone())
                    .unwrap_or_default(),
                ts: message.origin.ts.to_string(),
                thread_ts: message.origin.thread_ts.as_ref().map(ToString::to_string),
                files,
                is_dm: channel_type == "im",
                is_bot: message.sender.bot_id.is_some(),
                is_mention: false,
            };
            tokio::spawn(async move {
                dispatcher.handle_message(inbound).await;
            });
        }
        SlackEventCallbackBody::AppMention(mention) => {
            let inbound = InboundMessage {
                channel: mention.channel.to_string(),
                user: mention.user.to_string(),
                text: mention.content.text.clone().unwrap_or_default(),
                ts: mention.origin.ts.to_string(),
                thread_ts: mention.origin.thread_ts.as_ref().map(ToString::to_string),
                files: Vec::new(),
                is_dm: false,
                is_bot: false,
                is_mention: true,
            };
            tokio::spawn(async move {
                dispatcher.handle_message(inbound).await;
            });
        }
        SlackEventCallbackBody::ReactionAdded(reaction) => {
            let SlackReactionsItem::Message(message) = reaction.item else {
                return Ok(());
            };
            let Some(channel) = message.origin.channel else {
                return Ok(());
            };
            let inbound = InboundReaction {
                channel: channel.to_string(),
                user: reaction.user.to_string(),
                reaction: reaction.reaction.to_string(),
                message_ts: message.origin.ts.to_string(),
                item_is_own: message.sender.bot_id.is_some(),
            };
            tokio::spawn(async move {
                dispatcher.handle_reaction(inbound).await;
            });
        }
        other => {
            debug!(?other, "unhandled push event");
        }
    }

    Ok(())
}

/// Handle interactive payloads (approval button clicks).
///
/// # Errors
///
/// Never fails; malformed payloads are logged and dropped.
pub async fn handle_interaction(
    event: SlackInteractionEvent,
    _client: Arc<SlackClient<SlackClientHyperHttpsConnector>>,
    state: SlackClientEventsUserState,
) -> slack_morphism::UserCallbackResult<()> {
    let Some(dispatcher) = dispatcher_from_state(&state).await else {
        warn!("dispatcher not available; dropping interaction");
        return Ok(());
    };

    if let SlackInteractionEvent::BlockActions(block_event) = &event {
        if let Some(actions) = &block_event.actions {
            for action in actions {
                let action_id = action.action_id.to_string();
                let value = action.value.clone().unwrap_or_default();
                debug!(action_id, "dispatching block action");
                dispatcher.handle_block_action(&action_id, &value);
            }
        }
    }

    Ok(())
}
