//! Append-only per-session transcript on disk.
//!
//! One JSON record per line at
//! `<state-dir>/sessions/<instance>-<conversation>.jsonl`. The owning
//! session is the single writer; replaying a transcript reconstructs the
//! session's context after a restart. Truncation is an operator action.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::models::message::ChatMessage;
use crate::Result;

/// One persisted transcript line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub message: ChatMessage,
}

/// Conversation ids contain `:` separators; keep file names flat.
#[must_use]
pub fn sanitize_conversation_id(conversation_id: &str) -> String {
    conversation_id
        .chars()
        .map(|c| match c {
            ':' | '/' | '\\' => '_',
            other => other,
        })
        .collect()
}

/// Transcript file path for a session key.
#[must_use]
pub fn transcript_path(sessions_dir: &Path, instance: &str, conversation_id: &str) -> PathBuf {
    sessions_dir.join(format!(
        "{instance}-{}.jsonl",
        sanitize_conversation_id(conversation_id)
    ))
}

/// Single-writer append-only transcript store.
pub struct TranscriptStore {
    path: PathBuf,
}

impl TranscriptStore {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one message as a JSON line.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the directory cannot be created or the
    /// write fails.
    pub async fn append(&self, message: &ChatMessage) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let record = TranscriptRecord {
            at: Utc::now(),
            message: message.clone(),
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    /// Replay the transcript into an ordered context.
    ///
    /// Missing files yield an empty context; unparseable lines are skipped
    /// so a corrupt tail cannot brick a session.
    pub async fn replay(&self) -> Vec<ChatMessage> {
        let Ok(content) = tokio::fs::read_to_string(&self.path).await else {
            return Vec::new();
        };
        content
            .lines()
            .filter_map(|line| serde_json::from_str::<TranscriptRecord>(line).ok())
            .map(|record| record.message)
            .collect()
    }
}
