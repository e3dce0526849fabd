//! Outbound Slack surface as a trait seam.
//!
//! The dispatcher, roundtable, approval, display, and onboarding code all
//! talk to this trait instead of the Slack client directly, which keeps
//! them exercisable in tests with an in-memory gateway.

use std::path::Path;

use async_trait::async_trait;

use crate::Result;

/// Identity used for an outbound post.
///
/// Status messages post under the bot's own identity because `chat.update`
/// works only on bot-identity posts; final responses post under the
/// instance persona and are never edited. This is the two-post pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostIdentity {
    Bot,
    Persona { username: String, icon_emoji: String },
}

/// A button attached to an interactive post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageButton {
    pub action_id: String,
    pub label: String,
    pub value: String,
}

/// An outbound `chat.postMessage`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub channel: String,
    pub thread_ts: Option<String>,
    pub text: String,
    pub identity: PostIdentity,
    pub buttons: Vec<MessageButton>,
}

impl OutboundMessage {
    /// Bot-identity plain post (editable; used for status messages).
    #[must_use]
    pub fn bot(channel: impl Into<String>, thread_ts: Option<String>, text: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            thread_ts,
            text: text.into(),
            identity: PostIdentity::Bot,
            buttons: Vec::new(),
        }
    }

    /// Persona-identity post (non-editable; used for final responses).
    #[must_use]
    pub fn persona(
        channel: impl Into<String>,
        thread_ts: Option<String>,
        text: impl Into<String>,
        username: impl Into<String>,
        icon_emoji: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            thread_ts,
            text: text.into(),
            identity: PostIdentity::Persona {
                username: username.into(),
                icon_emoji: icon_emoji.into(),
            },
            buttons: Vec::new(),
        }
    }
}

/// A message fetched back from channel history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedMessage {
    pub text: String,
    pub user: Option<String>,
    /// Set when the message was posted by a bot.
    pub is_bot: bool,
}

/// Channel metadata needed for routing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelInfo {
    pub name: String,
    pub topic: String,
}

/// Thread-safe outbound Slack capability set; many concurrent callers.
#[async_trait]
pub trait SlackGateway: Send + Sync {
    /// Post a message; returns the new message's `ts`.
    async fn post_message(&self, message: OutboundMessage) -> Result<String>;

    /// Edit a bot-identity message in place.
    async fn update_message(&self, channel: &str, ts: &str, text: &str) -> Result<()>;

    async fn delete_message(&self, channel: &str, ts: &str) -> Result<()>;

    async fn add_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<()>;

    async fn remove_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<()>;

    /// Fetch a single message by timestamp (for summons and regenerates).
    async fn fetch_message(&self, channel: &str, ts: &str) -> Result<Option<FetchedMessage>>;

    /// Channel name and topic (for routing directives).
    async fn channel_info(&self, channel: &str) -> Result<ChannelInfo>;

    /// Open (or reuse) a DM with a user; returns the DM channel id.
    async fn open_dm(&self, user: &str) -> Result<String>;

    async fn upload_file(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        filename: &str,
        content: Vec<u8>,
    ) -> Result<()>;

    /// Download a file shared into Slack to a local path; returns bytes
    /// written.
    async fn download_file(&self, url: &str, dest: &Path) -> Result<u64>;
}
