//! Formatting utilities for Slack messages.
//!
//! Pure functions for converting markdown to Slack mrkdwn, rendering
//! progress/status lines, and formatting durations.

use std::fmt::Write as _;

use regex::Regex;
use std::sync::OnceLock;

use crate::models::progress::{TodoItem, TodoStatus};

const SEPARATOR: &str = "───────────────────────────────────────";

fn re(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex"))
}

/// Convert standard markdown to Slack's mrkdwn format.
///
/// Slack's mrkdwn differs from standard markdown: `*bold*` instead of
/// `**bold**`, `<url|text>` instead of `[text](url)`, no headings, no
/// tables, no horizontal rules. Tables and code blocks are extracted
/// first so their content isn't mangled by inline conversions.
#[must_use]
pub fn markdown_to_slack(text: &str) -> String {
    static CODE_BLOCK: OnceLock<Regex> = OnceLock::new();
    static INLINE_CODE: OnceLock<Regex> = OnceLock::new();
    static BOLD: OnceLock<Regex> = OnceLock::new();
    static LINK: OnceLock<Regex> = OnceLock::new();
    static HEADING: OnceLock<Regex> = OnceLock::new();
    static HRULE: OnceLock<Regex> = OnceLock::new();
    static BLANKS: OnceLock<Regex> = OnceLock::new();

    let mut protected: Vec<String> = Vec::new();
    let mut protect = |content: &str| {
        protected.push(content.to_owned());
        format!("\u{0}PROTECTED{}\u{0}", protected.len() - 1)
    };

    // 1. Protect existing code blocks.
    let mut out = re(&CODE_BLOCK, r"(?s)```.*?```")
        .replace_all(text, |caps: &regex::Captures<'_>| protect(&caps[0]))
        .into_owned();

    // 2. Protect inline code.
    out = re(&INLINE_CODE, r"`[^`]+`")
        .replace_all(&out, |caps: &regex::Captures<'_>| protect(&caps[0]))
        .into_owned();

    // 3. Convert tables before inline formatting so cell markup is
    //    stripped rather than half-converted.
    out = convert_tables(&out, &mut protect);

    // 4. Inline formatting.
    out = re(&BOLD, r"\*\*(.+?)\*\*").replace_all(&out, "*$1*").into_owned();
    out = re(&LINK, r"\[([^\]]+)\]\(([^)]+)\)")
        .replace_all(&out, "<$2|$1>")
        .into_owned();
    out = re(&HEADING, r"(?m)^#{1,6}\s+(.+)$")
        .replace_all(&out, "*$1*")
        .into_owned();
    out = re(&HRULE, r"(?m)^[-*_]{3,}\s*$")
        .replace_all(&out, "\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n")
        .into_owned();

    // 5. Restore protected content.
    for (i, content) in protected.iter().enumerate() {
        out = out.replace(&format!("\u{0}PROTECTED{i}\u{0}"), content);
    }

    // Collapse excessive blank lines.
    out = re(&BLANKS, r"\n{3,}").replace_all(&out, "\n\n").into_owned();

    out.trim().to_owned()
}

/// Find markdown tables and convert them to list form that wraps
/// gracefully on narrow screens.
fn convert_tables(text: &str, protect: &mut impl FnMut(&str) -> String) -> String {
    static TABLE_ROW: OnceLock<Regex> = OnceLock::new();
    static TABLE_SEP: OnceLock<Regex> = OnceLock::new();

    let row_re = re(&TABLE_ROW, r"^\s*\|.*\|\s*$");
    let sep_re = re(&TABLE_SEP, r"^\s*\|[-:\s|]+\|\s*$");

    let mut result: Vec<String> = Vec::new();
    let mut table_lines: Vec<&str> = Vec::new();
    let mut in_table = false;

    for line in text.split('\n') {
        let is_row = row_re.is_match(line);
        let is_sep = sep_re.is_match(line);

        if is_row {
            if !in_table {
                in_table = true;
                table_lines.clear();
            }
            if !is_sep {
                table_lines.push(line);
            }
        } else {
            if in_table {
                result.push(protect(&render_table_as_list(&table_lines)));
                table_lines.clear();
                in_table = false;
            }
            result.push(line.to_owned());
        }
    }
    if in_table {
        result.push(protect(&render_table_as_list(&table_lines)));
    }

    result.join("\n")
}

/// Strip markdown bold from cell text.
fn clean_cell(text: &str) -> String {
    static BOLD: OnceLock<Regex> = OnceLock::new();
    re(&BOLD, r"\*\*(.+?)\*\*")
        .replace_all(text, "$1")
        .trim()
        .to_owned()
}

/// Two-column tables become `*Key:* Value` lines; wider tables become a
/// labeled block per row.
fn render_table_as_list(rows: &[&str]) -> String {
    let parsed: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            row.trim()
                .trim_matches('|')
                .split('|')
                .map(|cell| cell.trim().to_owned())
                .collect()
        })
        .collect();

    let Some((headers, data_rows)) = parsed.split_first() else {
        return String::new();
    };

    if data_rows.is_empty() {
        return headers
            .iter()
            .map(|h| format!("*{}*", clean_cell(h)))
            .collect::<Vec<_>>()
            .join("  ");
    }

    if headers.len() == 2 {
        return data_rows
            .iter()
            .map(|row| {
                let key = row.first().map(|c| clean_cell(c)).unwrap_or_default();
                let val = row.get(1).cloned().unwrap_or_default();
                format!("*{key}:* {val}")
            })
            .collect::<Vec<_>>()
            .join("\n");
    }

    let mut lines: Vec<String> = Vec::new();
    for row in data_rows {
        let label = row.first().map(|c| clean_cell(c)).unwrap_or_default();
        lines.push(format!("*{label}*"));
        for col in 1..headers.len() {
            let header = clean_cell(&headers[col]);
            let value = row.get(col).cloned().unwrap_or_default();
            lines.push(format!("  {header}: {value}"));
        }
        lines.push(String::new());
    }
    lines.join("\n").trim_end().to_owned()
}

/// Convert tool names to human-friendly status descriptions.
#[must_use]
pub fn friendly_tool_name(tool_name: &str) -> String {
    match tool_name {
        "read_file" => "Reading files".to_owned(),
        "write_file" => "Writing files".to_owned(),
        "edit_file" => "Editing files".to_owned(),
        "bash" => "Running command".to_owned(),
        "glob" => "Searching files".to_owned(),
        "grep" => "Searching content".to_owned(),
        "web_search" => "Searching the web".to_owned(),
        "web_fetch" => "Fetching web page".to_owned(),
        "delegate" => "Delegating to agent".to_owned(),
        "todo" => "Managing tasks".to_owned(),
        "dispatch_worker" => "Dispatching worker".to_owned(),
        "analyze_image" => "Analyzing image".to_owned(),
        "extract_pdf_text" => "Reading PDF".to_owned(),
        "load_skill" => "Loading knowledge".to_owned(),
        "slack_send_message" => "Posting to Slack".to_owned(),
        "slack_add_reaction" => "Reacting in Slack".to_owned(),
        other => format!("Working ({other})"),
    }
}

/// Format seconds into a human-readable duration. Empty for under 10 s.
#[must_use]
pub fn format_duration(seconds: u64) -> String {
    if seconds < 10 {
        return String::new();
    }
    if seconds < 60 {
        return format!("{seconds}s");
    }
    let (minutes, rem) = (seconds / 60, seconds % 60);
    if rem == 0 {
        format!("{minutes}m")
    } else {
        format!("{minutes}m {rem}s")
    }
}

/// Render the one-line simple-mode status.
#[must_use]
pub fn render_simple_status(
    current_tool: Option<&str>,
    current_agent: Option<&str>,
    duration: &str,
    queued: usize,
) -> String {
    let mut line = match (current_tool, current_agent) {
        (Some("delegate"), Some(agent)) => format!("⚙️ Delegating to {agent}…"),
        (Some(tool), _) => format!("⚙️ {}…", friendly_tool_name(tool)),
        (None, _) => "⚙️ Thinking…".to_owned(),
    };
    if !duration.is_empty() {
        let _ = write!(line, " · {duration}");
    }
    if queued > 0 {
        let plural = if queued == 1 { "" } else { "s" };
        let _ = write!(line, " · {queued} message{plural} queued");
    }
    line
}

/// Render the multi-line plan-mode status with the todo list.
#[must_use]
pub fn render_todo_status(
    todos: &[TodoItem],
    current_tool: Option<&str>,
    instance_name: &str,
    duration: &str,
    queued: usize,
) -> String {
    let mut lines: Vec<String> = Vec::new();

    let mut header = format!("⚙️ {instance_name}");
    if !duration.is_empty() {
        let _ = write!(header, " · {duration}");
    }
    lines.push(header);
    lines.push(SEPARATOR.to_owned());

    let completed: Vec<&TodoItem> = todos
        .iter()
        .filter(|t| t.status == TodoStatus::Completed)
        .collect();
    let in_progress: Vec<&TodoItem> = todos
        .iter()
        .filter(|t| t.status == TodoStatus::InProgress)
        .collect();
    let pending: Vec<&TodoItem> = todos
        .iter()
        .filter(|t| t.status == TodoStatus::Pending)
        .collect();

    if completed.len() > 2 {
        lines.push(format!("✅  {} completed", completed.len()));
    } else {
        for item in &completed {
            lines.push(format!("✅  {}", item.content));
        }
    }

    for item in &in_progress {
        let active = if item.active_form.is_empty() {
            &item.content
        } else {
            &item.active_form
        };
        lines.push(format!("▸  *{active}*"));
    }

    for item in pending.iter().take(2) {
        lines.push(format!("○  {}", item.content));
    }
    if pending.len() > 2 {
        lines.push(format!("    +{} more", pending.len() - 2));
    }

    let tool_text = match current_tool {
        Some("delegate") => "Delegating to agent".to_owned(),
        Some(tool) => friendly_tool_name(tool),
        None => "Thinking".to_owned(),
    };
    let mut footer = format!(
        "🔧 {tool_text} · {} of {} complete",
        completed.len(),
        todos.len()
    );
    if queued > 0 {
        let plural = if queued == 1 { "" } else { "s" };
        let _ = write!(footer, " · {queued} message{plural} queued");
    }
    lines.push(footer);

    lines.join("\n")
}
