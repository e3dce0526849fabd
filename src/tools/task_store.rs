//! Structured read/write for TASKS.md, the Director's task memory.
//!
//! A section-based parser replaces fragile line-by-line edits. All
//! mutations go through an async lock and writes use a temp-file + rename
//! pattern for atomicity.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::info;

use crate::{AppError, Result};

/// Canonical section names in render order.
pub const SECTION_ACTIVE: &str = "Active";
pub const SECTION_WAITING: &str = "Waiting";
pub const SECTION_PARKED: &str = "Parked";
pub const SECTION_DONE: &str = "Done (last 30 days)";

const SECTIONS_ORDER: [&str; 4] = [SECTION_ACTIVE, SECTION_WAITING, SECTION_PARKED, SECTION_DONE];

/// Collapse a value to a single line.
#[must_use]
pub fn sanitize_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Map heading variants to canonical names (`## Done` → the dated heading).
fn normalize_section(name: &str) -> String {
    if name.to_lowercase().starts_with("done") {
        SECTION_DONE.to_owned()
    } else {
        name.to_owned()
    }
}

/// A single task entry with ordered key-value fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub fields: Vec<(String, String)>,
}

impl Task {
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_field(&mut self, key: &str, value: String) {
        if let Some(entry) = self.fields.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value;
        } else {
            self.fields.push((key.to_owned(), value));
        }
    }
}

/// Parsed TASKS.md structure: ordered sections containing task entries.
#[derive(Debug, Default, Clone)]
pub struct TaskFile {
    sections: Vec<(String, Vec<Task>)>,
}

impl TaskFile {
    #[must_use]
    pub fn section(&self, name: &str) -> &[Task] {
        self.sections
            .iter()
            .find(|(n, _)| n == name)
            .map_or(&[], |(_, tasks)| tasks.as_slice())
    }

    fn section_mut(&mut self, name: &str) -> &mut Vec<Task> {
        let pos = match self.sections.iter().position(|(n, _)| n == name) {
            Some(pos) => pos,
            None => {
                self.sections.push((name.to_owned(), Vec::new()));
                self.sections.len() - 1
            }
        };
        &mut self.sections[pos].1
    }

    /// Find a task by id across all sections.
    #[must_use]
    pub fn find_task(&self, task_id: &str) -> Option<&Task> {
        self.sections
            .iter()
            .flat_map(|(_, tasks)| tasks.iter())
            .find(|t| t.id == task_id)
    }

    fn find_task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.sections
            .iter_mut()
            .flat_map(|(_, tasks)| tasks.iter_mut())
            .find(|t| t.id == task_id)
    }

    /// Remove a task by id from whatever section it is in.
    pub fn remove_task(&mut self, task_id: &str) -> Option<Task> {
        for (_, tasks) in &mut self.sections {
            if let Some(pos) = tasks.iter().position(|t| t.id == task_id) {
                return Some(tasks.remove(pos));
            }
        }
        None
    }
}

/// Parse TASKS.md content into a [`TaskFile`].
#[must_use]
pub fn parse_tasks(content: &str) -> TaskFile {
    let mut tf = TaskFile::default();
    for name in SECTIONS_ORDER {
        tf.sections.push((name.to_owned(), Vec::new()));
    }

    let mut current_section: Option<String> = None;
    let mut in_task = false;

    for line in content.lines() {
        let stripped = line.trim();

        // Top-level heading — skip.
        if stripped.starts_with("# ") && !stripped.starts_with("## ") {
            in_task = false;
            continue;
        }

        if let Some(heading) = stripped.strip_prefix("## ") {
            let name = normalize_section(heading.trim());
            tf.section_mut(&name);
            current_section = Some(name);
            in_task = false;
            continue;
        }

        // Blank line — entry boundary.
        if stripped.is_empty() {
            in_task = false;
            continue;
        }

        let Some(ref section) = current_section else {
            continue;
        };

        if let Some(id) = stripped.strip_prefix("- id: ") {
            tf.section_mut(section).push(Task {
                id: id.trim().to_owned(),
                fields: Vec::new(),
            });
            in_task = true;
            continue;
        }

        if in_task {
            let tasks = tf.section_mut(section);
            let Some(task) = tasks.last_mut() else {
                continue;
            };
            // Field line: 2-space indent, word key, colon.
            if let Some(field) = line.strip_prefix("  ") {
                if let Some((key, value)) = field.split_once(':') {
                    if !key.is_empty() && key.chars().all(|c| c.is_alphanumeric() || c == '_') {
                        task.fields.push((key.to_owned(), value.trim().to_owned()));
                        continue;
                    }
                }
            }
            // Unrecognized line inside an entry — append to the last value.
            if let Some(last) = task.fields.last_mut() {
                last.1.push(' ');
                last.1.push_str(stripped);
            }
        }
    }

    tf
}

/// Render a [`TaskFile`] back to TASKS.md markdown.
#[must_use]
pub fn render_tasks(tf: &TaskFile) -> String {
    let mut lines: Vec<String> = vec!["# Director Task Memory".to_owned(), String::new()];

    for (name, tasks) in &tf.sections {
        lines.push(format!("## {name}"));
        if tasks.is_empty() {
            lines.push(String::new());
            continue;
        }
        for task in tasks {
            lines.push(format!("- id: {}", task.id));
            for (key, value) in &task.fields {
                lines.push(format!("  {key}: {}", sanitize_value(value)));
            }
            lines.push(String::new());
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Async-safe, atomic read/write for TASKS.md.
pub struct TaskStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl TaskStore {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> TaskFile {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => parse_tasks(&content),
            Err(_) => parse_tasks(""),
        }
    }

    /// Atomic write: temp file in the same directory, then rename.
    async fn write(&self, tf: &TaskFile) -> Result<()> {
        let content = render_tasks(tf);
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("md.tmp");
        tokio::fs::write(&tmp, content.as_bytes()).await?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|err| AppError::Io(format!("failed to replace TASKS.md: {err}")))
    }

    /// Add a new task to the Active section.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file cannot be written.
    pub async fn add_active(&self, task_id: &str, description: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut tf = self.read().await;
        let truncated: String = description.chars().take(200).collect();
        let task = Task {
            id: task_id.to_owned(),
            fields: vec![
                ("description".to_owned(), sanitize_value(&truncated)),
                ("started".to_owned(), Utc::now().date_naive().to_string()),
                ("status".to_owned(), "worker dispatched".to_owned()),
            ],
        };
        tf.section_mut(SECTION_ACTIVE).insert(0, task);
        self.write(&tf).await?;
        info!(task_id, "added to TASKS.md Active");
        Ok(())
    }

    /// Move a task from its current section to Done.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file cannot be written.
    pub async fn complete_task(&self, task_id: &str, summary: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut tf = self.read().await;
        let old = tf.remove_task(task_id);
        let mut done = Task {
            id: task_id.to_owned(),
            fields: vec![
                ("completed".to_owned(), Utc::now().date_naive().to_string()),
                ("summary".to_owned(), sanitize_value(summary)),
            ],
        };
        if let Some(artifacts) = old.as_ref().and_then(|t| t.field("artifacts")) {
            done.set_field("artifacts", artifacts.to_owned());
        }
        tf.section_mut(SECTION_DONE).insert(0, done);
        self.write(&tf).await?;
        info!(task_id, "moved to TASKS.md Done");
        Ok(())
    }

    /// Mark a specific task as failed in place.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file cannot be written.
    pub async fn fail_task(&self, task_id: &str, error: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut tf = self.read().await;
        if let Some(task) = tf.find_task_mut(task_id) {
            let truncated: String = error.chars().take(200).collect();
            task.set_field("status", format!("failed -- {}", sanitize_value(&truncated)));
        }
        self.write(&tf).await?;
        info!(task_id, "marked as failed in TASKS.md");
        Ok(())
    }

    /// Snapshot read of the current state.
    pub async fn read_all(&self) -> TaskFile {
        self.read().await
    }
}
