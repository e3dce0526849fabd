//! Slack display back-channel for hook messages.
//!
//! Fire-and-forget: a failed post is logged, never raised — hooks must
//! not block on Slack.

use std::sync::Arc;

use tracing::debug;

use crate::session::hooks::{DisplayHook, DisplayLevel};

use super::gateway::{OutboundMessage, SlackGateway};

/// Posts hook display messages into the conversation's thread.
pub struct SlackDisplaySystem {
    gateway: Arc<dyn SlackGateway>,
    channel: String,
    thread_ts: Option<String>,
}

impl SlackDisplaySystem {
    #[must_use]
    pub fn new(gateway: Arc<dyn SlackGateway>, channel: String, thread_ts: Option<String>) -> Self {
        Self {
            gateway,
            channel,
            thread_ts,
        }
    }
}

impl DisplayHook for SlackDisplaySystem {
    fn show_message(&self, text: &str, level: DisplayLevel, source: &str) {
        let prefix = match level {
            DisplayLevel::Warning => "⚠️ ",
            DisplayLevel::Error => "🚨 ",
            DisplayLevel::Info => "",
        };
        let message = OutboundMessage::bot(
            self.channel.clone(),
            self.thread_ts.clone(),
            format!("{prefix}{text}"),
        );
        let gateway = Arc::clone(&self.gateway);
        let source = source.to_owned();
        tokio::spawn(async move {
            if let Err(err) = gateway.post_message(message).await {
                debug!(%err, source, "failed to post display message");
            }
        });
    }
}
