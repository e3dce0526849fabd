//! Shared-file intake and outbox processing.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::Result;

use super::gateway::SlackGateway;

/// A file attached to an inbound message, as normalized from the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedFile {
    pub name: String,
    pub size: u64,
    pub url_private: String,
}

/// Keep file names flat and shell-safe inside the working directory.
fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            other => other,
        })
        .collect();
    if cleaned.is_empty() {
        "upload".to_owned()
    } else {
        cleaned
    }
}

fn human_size(bytes: u64) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

/// Download shared files into the instance working directory and build
/// the user-visible preamble enumerating `(filename, size) → path`.
///
/// Files over the size cap are skipped with a friendly note; download
/// failures likewise never abort the message.
pub async fn ingest_shared_files(
    gateway: &Arc<dyn SlackGateway>,
    files: &[SharedFile],
    working_dir: &Path,
    size_cap_bytes: u64,
) -> String {
    if files.is_empty() {
        return String::new();
    }

    let uploads_dir = working_dir.join("uploads");
    let mut lines = vec!["[The user shared files:]".to_owned()];

    for file in files {
        if file.size > size_cap_bytes {
            info!(name = %file.name, size = file.size, "skipping oversized shared file");
            lines.push(format!(
                "- {} ({}) — skipped, that file's a bit too big",
                file.name,
                human_size(file.size)
            ));
            continue;
        }

        let dest = uploads_dir.join(sanitize_filename(&file.name));
        match gateway.download_file(&file.url_private, &dest).await {
            Ok(bytes) => {
                info!(name = %file.name, bytes, dest = %dest.display(), "shared file saved");
                lines.push(format!(
                    "- {} ({}) → {}",
                    file.name,
                    human_size(file.size),
                    dest.display()
                ));
            }
            Err(err) => {
                warn!(name = %file.name, %err, "shared file download failed");
                lines.push(format!("- {} — could not be downloaded", file.name));
            }
        }
    }

    lines.join("\n")
}

/// Upload and remove any files the session left in `.outbox/`.
///
/// # Errors
///
/// Returns `AppError::Io` only for directory scan failures; individual
/// upload failures are logged and the file is left in place for retry.
pub async fn process_outbox(
    gateway: &Arc<dyn SlackGateway>,
    working_dir: &Path,
    channel: &str,
    thread_ts: Option<&str>,
) -> Result<usize> {
    let outbox = working_dir.join(".outbox");
    if !outbox.is_dir() {
        return Ok(0);
    }

    let mut uploaded = 0;
    let mut entries = tokio::fs::read_dir(&outbox).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let filename = entry.file_name().to_string_lossy().into_owned();
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(err) => {
                warn!(file = %path.display(), %err, "outbox read failed");
                continue;
            }
        };
        match gateway
            .upload_file(channel, thread_ts, &filename, content)
            .await
        {
            Ok(()) => {
                if let Err(err) = tokio::fs::remove_file(&path).await {
                    warn!(file = %path.display(), %err, "outbox cleanup failed");
                }
                uploaded += 1;
                info!(file = %filename, "outbox file uploaded");
            }
            Err(err) => {
                warn!(file = %filename, %err, "outbox upload failed, leaving in place");
            }
        }
    }
    Ok(uploaded)
}
