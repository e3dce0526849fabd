//! Per-user onboarding: welcome DM and progressive teaching suffixes.
//!
//! Tracks each user's progress (welcome sent, threads started, tips
//! shown) and picks a context-appropriate suffix to append to bot
//! responses. At most one suffix per response; the system goes silent
//! after roughly six distinct interactions.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info};

use crate::models::onboarding::{
    OnboardingState, TIP_FILE_UPLOAD, TIP_MID_EXECUTION, TIP_REGENERATE,
};

use super::gateway::{OutboundMessage, SlackGateway};

const THREAD_FOOTER: &str = "\n───────────────────────────────\n_New thread, fresh start — I don't have context from your other conversations._";

const CROSS_THREAD_NOTE: &str = "\n───────────────────────────────\n_Heads up: each thread is its own conversation, so I don't have context from other threads. If you're referring to something specific, paste it here and I'll pick right up._";

const REGENERATE_TIP: &str = "\n───────────────────────────────\n_Tip: React with :arrows_counterclockwise: on any of my responses to get a fresh take._";

const FILE_UPLOAD_TIP: &str = "\n───────────────────────────────\n_Tip: You can drop files into the thread — code, images, docs. I'll read them._";

const MID_EXECUTION_TIP: &str = "\n───────────────────────────────\n_Tip: When you see the :hourglass_flowing_sand:, you can send follow-up messages to steer what I'm doing._";

const WELCOME_TEXT: &str = "Hey! I'm your team's AI assistant. Mention me in a channel \
or message me here and I'll help out. Each thread is its own conversation — start a \
new one whenever you want a fresh start.";

/// Footer shows during the first N threads.
const FOOTER_THREADS: u32 = 3;
/// Cross-thread confusion notes are capped for a user's lifetime.
const CROSS_THREAD_CAP: u32 = 3;
/// Recent thread ids kept per user.
const RECENT_THREAD_CAP: usize = 50;
/// Seconds a response must take before the mid-execution tip fires.
const LONG_RESPONSE_SECS: u64 = 20;

fn cross_thread_patterns() -> &'static Regex {
    static PATTERNS: OnceLock<Regex> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        Regex::new(concat!(
            r"(?i)\b(",
            r"as (?:I|we) (?:said|mentioned|asked|described|discussed|noted)",
            r"|like (?:I|we) (?:said|discussed|talked about|mentioned)",
            r"|remember (?:when|what|that thing|the)",
            r"|(?:from|going back to) (?:earlier|before|our (?:last|previous))",
            r"|you (?:said|told me|mentioned|suggested|recommended)",
            r"|(?:earlier|previously|last time) (?:you|I|we)",
            r"|(?:in|from) (?:the|that|my) other (?:thread|conversation|chat|channel)",
            r"|continu(?:e|ing) (?:from |our |where )",
            r"|pick(?:ing)? up where",
            r")",
        ))
        .expect("static regex")
    })
}

/// Check whether text contains backward references to other conversations.
#[must_use]
pub fn has_cross_thread_reference(text: &str) -> bool {
    cross_thread_patterns().is_match(text)
}

/// Record a thread interaction. Returns `true` for a NEW thread.
pub fn record_thread(state: &mut OnboardingState, conversation_id: &str) -> bool {
    if state
        .recent_threads
        .iter()
        .any(|t| t == conversation_id)
    {
        return false;
    }
    state.recent_threads.push(conversation_id.to_owned());
    state.threads_started += 1;
    if state.recent_threads.len() > RECENT_THREAD_CAP {
        let excess = state.recent_threads.len() - RECENT_THREAD_CAP;
        state.recent_threads.drain(..excess);
    }
    true
}

/// Pick the onboarding suffix for a response; empty when the system has
/// dissolved. First match wins:
///
/// 1. cross-thread confusion note (reactive, lifetime-capped)
/// 2. thread footer (first threads)
/// 3. mid-execution tip (long responses, after footer phase)
/// 4. regenerate tip (first new thread after footer phase)
/// 5. file-upload tip (next new thread after that)
#[must_use]
pub fn response_suffix(
    state: &mut OnboardingState,
    is_new_thread: bool,
    response_duration_secs: u64,
    has_cross_thread_ref: bool,
) -> String {
    if has_cross_thread_ref && is_new_thread && state.cross_thread_notes_shown < CROSS_THREAD_CAP {
        state.cross_thread_notes_shown += 1;
        return CROSS_THREAD_NOTE.to_owned();
    }

    if is_new_thread && state.threads_started <= FOOTER_THREADS {
        return THREAD_FOOTER.to_owned();
    }

    // Everything below fires only after the footer phase.
    if state.threads_started <= FOOTER_THREADS {
        return String::new();
    }

    if response_duration_secs > LONG_RESPONSE_SECS && !state.tip_shown(TIP_MID_EXECUTION) {
        state.mark_tip(TIP_MID_EXECUTION);
        return MID_EXECUTION_TIP.to_owned();
    }

    if !is_new_thread {
        return String::new();
    }

    for (name, text) in [
        (TIP_REGENERATE, REGENERATE_TIP),
        (TIP_FILE_UPLOAD, FILE_UPLOAD_TIP),
    ] {
        if !state.tip_shown(name) {
            state.mark_tip(name);
            return text.to_owned();
        }
    }

    String::new()
}

/// Loads, saves, and welcomes users. One record per user id under the
/// state directory.
pub struct OnboardingManager {
    users_dir: PathBuf,
    gateway: Arc<dyn SlackGateway>,
}

impl OnboardingManager {
    #[must_use]
    pub fn new(users_dir: PathBuf, gateway: Arc<dyn SlackGateway>) -> Self {
        Self { users_dir, gateway }
    }

    fn state_path(&self, user_id: &str) -> PathBuf {
        self.users_dir.join(user_id).join("onboarding.json")
    }

    /// Load state from disk, or create fresh state for new users.
    pub async fn load(&self, user_id: &str) -> OnboardingState {
        let path = self.state_path(user_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => match serde_json::from_str::<OnboardingState>(&raw) {
                Ok(mut state) => {
                    state.normalize();
                    state
                }
                Err(err) => {
                    debug!(user_id, %err, "could not parse onboarding state");
                    OnboardingState::new(user_id)
                }
            },
            Err(_) => OnboardingState::new(user_id),
        }
    }

    /// Persist state. Best-effort — never raises.
    pub async fn save(&self, state: &OnboardingState) {
        let path = self.state_path(&state.user_id);
        let write = async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let tmp = path.with_extension("json.tmp");
            tokio::fs::write(&tmp, serde_json::to_vec_pretty(state)?).await?;
            tokio::fs::rename(&tmp, &path).await?;
            crate::Result::Ok(())
        };
        if let Err(err) = write.await {
            debug!(user_id = %state.user_id, %err, "failed to save onboarding state");
        }
    }

    /// Open a DM and post the welcome text on a user's first interaction.
    pub async fn welcome_if_new(&self, state: &mut OnboardingState) {
        if state.welcomed {
            return;
        }
        state.welcomed = true;
        match self.gateway.open_dm(&state.user_id).await {
            Ok(dm_channel) => {
                let message = OutboundMessage::bot(dm_channel, None, WELCOME_TEXT);
                if let Err(err) = self.gateway.post_message(message).await {
                    debug!(user_id = %state.user_id, %err, "welcome post failed");
                } else {
                    info!(user_id = %state.user_id, "welcome DM sent");
                }
            }
            Err(err) => {
                debug!(user_id = %state.user_id, %err, "could not open welcome DM");
            }
        }
    }
}
