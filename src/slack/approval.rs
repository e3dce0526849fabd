//! Interactive approval via Slack buttons.
//!
//! `request_approval` posts one button per option, then waits on a
//! per-request completion signal. A button click resolves the pending
//! entry by correlation id, so clicks from different concurrent approvals
//! never cross. Expiry resolves to the default and the message is edited
//! to show that the default applied.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{info, warn};
use uuid::Uuid;

use crate::session::hooks::ApprovalHook;
use crate::Result;

use super::gateway::{MessageButton, OutboundMessage, PostIdentity, SlackGateway};

/// Correlation-keyed map of pending approval signals. Small and
/// short-lived; shared between the approval system and the dispatcher's
/// button-click handler.
#[derive(Default)]
pub struct ApprovalLedger {
    pending: Mutex<HashMap<String, oneshot::Sender<String>>>,
}

impl ApprovalLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, correlation_id: &str) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(correlation_id.to_owned(), tx);
        rx
    }

    fn remove(&self, correlation_id: &str) {
        self.pending.lock().remove(correlation_id);
    }

    /// Resolve a pending approval with the chosen option. Returns `true`
    /// if a pending request existed for the correlation id.
    pub fn resolve(&self, correlation_id: &str, choice: &str) -> bool {
        let Some(tx) = self.pending.lock().remove(correlation_id) else {
            return false;
        };
        if tx.send(choice.to_owned()).is_err() {
            warn!(correlation_id, "approval receiver already dropped");
        }
        info!(correlation_id, choice, "approval resolved");
        true
    }

    /// Parse an approval button's `action_id` into its correlation id.
    ///
    /// Format: `approval_<correlation>_<ordinal>`.
    #[must_use]
    pub fn correlation_from_action_id(action_id: &str) -> Option<&str> {
        let rest = action_id.strip_prefix("approval_")?;
        let (correlation, _) = rest.split_once('_')?;
        Some(correlation)
    }
}

/// The approval back-channel mounted on a session for one conversation.
pub struct SlackApprovalSystem {
    gateway: Arc<dyn SlackGateway>,
    ledger: Arc<ApprovalLedger>,
    channel: String,
    thread_ts: Option<String>,
}

impl SlackApprovalSystem {
    #[must_use]
    pub fn new(
        gateway: Arc<dyn SlackGateway>,
        ledger: Arc<ApprovalLedger>,
        channel: String,
        thread_ts: Option<String>,
    ) -> Self {
        Self {
            gateway,
            ledger,
            channel,
            thread_ts,
        }
    }
}

#[async_trait]
impl ApprovalHook for SlackApprovalSystem {
    async fn request_approval(
        &self,
        prompt: &str,
        options: &[String],
        default: &str,
        timeout: Duration,
    ) -> Result<String> {
        let correlation_id = Uuid::new_v4().simple().to_string()[..8].to_owned();

        let buttons: Vec<MessageButton> = options
            .iter()
            .enumerate()
            .map(|(ordinal, option)| MessageButton {
                action_id: format!("approval_{correlation_id}_{ordinal}"),
                label: option.clone(),
                value: option.clone(),
            })
            .collect();

        let rx = self.ledger.register(&correlation_id);

        let message = OutboundMessage {
            channel: self.channel.clone(),
            thread_ts: self.thread_ts.clone(),
            text: prompt.to_owned(),
            identity: PostIdentity::Bot,
            buttons,
        };
        let msg_ts = match self.gateway.post_message(message).await {
            Ok(ts) => ts,
            Err(err) => {
                self.ledger.remove(&correlation_id);
                return Err(err);
            }
        };

        let (selected, timed_out) = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(choice)) => (choice, false),
            Ok(Err(_)) => {
                // Sender dropped without sending (e.g. shutdown).
                (default.to_owned(), true)
            }
            Err(_) => {
                info!(
                    correlation_id,
                    timeout_secs = timeout.as_secs(),
                    default,
                    "approval timed out, using default"
                );
                (default.to_owned(), true)
            }
        };
        self.ledger.remove(&correlation_id);

        // Replace the buttons with the resolution.
        let resolution = if timed_out {
            format!("{prompt}\n\n*Selected: {selected} (default)*")
        } else {
            format!("{prompt}\n\n*Selected: {selected}*")
        };
        if let Err(err) = self
            .gateway
            .update_message(&self.channel, &msg_ts, &resolution)
            .await
        {
            warn!(%err, correlation_id, "failed to update approval message");
        }

        Ok(selected)
    }
}
