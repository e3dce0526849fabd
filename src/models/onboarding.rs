//! Per-user onboarding state record.
//!
//! Persisted at `<state-dir>/users/<user_id>/onboarding.json`. The system
//! is designed to dissolve: after roughly six distinct interactions it goes
//! silent forever.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tip names tracked in [`OnboardingState::tips_shown`].
pub const TIP_REGENERATE: &str = "regenerate";
pub const TIP_FILE_UPLOAD: &str = "file_upload";
pub const TIP_MID_EXECUTION: &str = "mid_execution";

/// Serializable per-user onboarding state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OnboardingState {
    pub user_id: String,
    #[serde(default = "default_version")]
    pub version: u32,
    pub first_seen: DateTime<Utc>,
    #[serde(default)]
    pub welcomed: bool,
    #[serde(default)]
    pub threads_started: u32,
    /// Most recent thread conversation ids, FIFO-capped.
    #[serde(default)]
    pub recent_threads: Vec<String>,
    /// Tip name → timestamp shown, or `None` if not yet shown.
    #[serde(default)]
    pub tips_shown: HashMap<String, Option<DateTime<Utc>>>,
    #[serde(default)]
    pub cross_thread_notes_shown: u32,
}

fn default_version() -> u32 {
    1
}

impl OnboardingState {
    /// Fresh state for a user seen for the first time.
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        let mut tips_shown = HashMap::new();
        for key in [TIP_REGENERATE, TIP_FILE_UPLOAD, TIP_MID_EXECUTION] {
            tips_shown.insert(key.to_owned(), None);
        }
        Self {
            user_id: user_id.into(),
            version: 1,
            first_seen: Utc::now(),
            welcomed: false,
            threads_started: 0,
            recent_threads: Vec::new(),
            tips_shown,
            cross_thread_notes_shown: 0,
        }
    }

    /// Ensure all expected tip keys exist after deserializing older records.
    pub fn normalize(&mut self) {
        for key in [TIP_REGENERATE, TIP_FILE_UPLOAD, TIP_MID_EXECUTION] {
            self.tips_shown.entry(key.to_owned()).or_insert(None);
        }
    }

    /// Whether a named tip has been shown.
    #[must_use]
    pub fn tip_shown(&self, name: &str) -> bool {
        matches!(self.tips_shown.get(name), Some(Some(_)))
    }

    /// Mark a named tip as shown now.
    pub fn mark_tip(&mut self, name: &str) {
        self.tips_shown.insert(name.to_owned(), Some(Utc::now()));
    }
}
