//! Connector-provided Slack tools.
//!
//! Mounted on a session post-creation, once a live conversation exists,
//! so the tools close over the correct channel and thread.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::models::message::ToolOutput;
use crate::slack::gateway::{OutboundMessage, SlackGateway};

use super::Tool;

/// Send a message in Slack.
pub struct SlackSendMessageTool {
    gateway: Arc<dyn SlackGateway>,
    default_channel: String,
    default_thread_ts: Option<String>,
}

impl SlackSendMessageTool {
    #[must_use]
    pub fn new(
        gateway: Arc<dyn SlackGateway>,
        default_channel: String,
        default_thread_ts: Option<String>,
    ) -> Self {
        Self {
            gateway,
            default_channel,
            default_thread_ts,
        }
    }
}

#[async_trait]
impl Tool for SlackSendMessageTool {
    fn name(&self) -> &str {
        "slack_send_message"
    }

    fn description(&self) -> &str {
        "Send a message in Slack. Posts to the current conversation thread by \
         default. Can also post to a different channel. Use for notifications, \
         summaries, or updates."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "The message text (markdown supported)",
                },
                "channel": {
                    "type": "string",
                    "description": "Channel name or ID to post to (optional — defaults to current channel)",
                },
                "thread_ts": {
                    "type": "string",
                    "description": "Thread timestamp to reply in (optional — defaults to current thread)",
                },
            },
            "required": ["text"],
        })
    }

    async fn execute(&self, input: Value) -> ToolOutput {
        let text = input.get("text").and_then(Value::as_str).unwrap_or("");
        if text.is_empty() {
            return ToolOutput::error("No text provided");
        }
        let channel = input
            .get("channel")
            .and_then(Value::as_str)
            .unwrap_or(&self.default_channel)
            .to_owned();
        let thread_ts = input
            .get("thread_ts")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .or_else(|| self.default_thread_ts.clone());

        let message = OutboundMessage::bot(channel.clone(), thread_ts.clone(), text);
        match self.gateway.post_message(message).await {
            Ok(_) => {
                let suffix = thread_ts
                    .map(|ts| format!(" in thread {ts}"))
                    .unwrap_or_default();
                ToolOutput::ok(format!("Message sent to {channel}{suffix}"))
            }
            Err(err) => ToolOutput::error(format!("Failed to send message: {err}")),
        }
    }
}

/// Add an emoji reaction to a message in Slack.
pub struct SlackReactionTool {
    gateway: Arc<dyn SlackGateway>,
    default_channel: String,
    last_user_ts: String,
}

impl SlackReactionTool {
    #[must_use]
    pub fn new(
        gateway: Arc<dyn SlackGateway>,
        default_channel: String,
        last_user_ts: String,
    ) -> Self {
        Self {
            gateway,
            default_channel,
            last_user_ts,
        }
    }
}

#[async_trait]
impl Tool for SlackReactionTool {
    fn name(&self) -> &str {
        "slack_add_reaction"
    }

    fn description(&self) -> &str {
        "Add an emoji reaction to a message in Slack. Use to acknowledge \
         messages, signal status, or mark completion. Common emoji: thumbsup, \
         white_check_mark, eyes, warning, fire, rocket"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "emoji": {
                    "type": "string",
                    "description": "Emoji name without colons (e.g., 'thumbsup', 'white_check_mark', 'eyes')",
                },
                "message_ts": {
                    "type": "string",
                    "description": "Timestamp of the message to react to (optional — defaults to the user's last message)",
                },
            },
            "required": ["emoji"],
        })
    }

    async fn execute(&self, input: Value) -> ToolOutput {
        let emoji = input.get("emoji").and_then(Value::as_str).unwrap_or("");
        if emoji.is_empty() {
            return ToolOutput::error("No emoji provided");
        }
        let message_ts = input
            .get("message_ts")
            .and_then(Value::as_str)
            .unwrap_or(&self.last_user_ts);
        if message_ts.is_empty() {
            return ToolOutput::error("No message timestamp available to react to");
        }

        match self
            .gateway
            .add_reaction(&self.default_channel, message_ts, emoji)
            .await
        {
            Ok(()) => ToolOutput::ok(format!("Reacted with :{emoji}:")),
            Err(err) => ToolOutput::error(format!("Failed to add reaction: {err}")),
        }
    }
}
