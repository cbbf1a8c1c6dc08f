//! Export rows, CSV output, summary statistics, and the terminal view

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::error::{Result, TriageError};
use crate::models::{display_sender, sender_address, ProcessedMessage};

const SUBJECT_LIMIT: usize = 100;
const DRAFT_LIMIT: usize = 300;
const TABLE_LIMIT: usize = 20;
const UNREPLIED_LIMIT: usize = 10;

/// One CSV row, columns in export order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportRow {
    #[serde(rename = "Sender")]
    pub sender: String,
    #[serde(rename = "Subject")]
    pub subject: String,
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Email Summary")]
    pub summary: String,
    #[serde(rename = "Replied")]
    pub replied: String,
    #[serde(rename = "Draft Reply")]
    pub draft_reply: String,
}

impl ExportRow {
    pub fn from_message(message: &ProcessedMessage) -> Self {
        let summary = if message.summary.trim().is_empty() {
            "No summary available".to_string()
        } else {
            message.summary.trim().replace('•', "-").replace('\n', " | ")
        };

        let draft_reply = match message.draft_reply.as_deref() {
            Some(draft) if !draft.trim().is_empty() => {
                truncate_string(&draft.replace("\n\n", " | ").replace('\n', " "), DRAFT_LIMIT)
            }
            _ => "N/A".to_string(),
        };

        Self {
            sender: display_sender(&message.sender),
            subject: truncate_string(message.subject.trim(), SUBJECT_LIMIT),
            date: message.received_at.format("%Y-%m-%d %H:%M").to_string(),
            summary,
            replied: if message.replied { "Yes" } else { "No" }.to_string(),
            draft_reply,
        }
    }
}

/// Truncate a string to max_len characters, adding "..." if truncated
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max_len.saturating_sub(3)).collect::<String>())
    }
}

pub fn prepare_rows(messages: &[ProcessedMessage]) -> Vec<ExportRow> {
    messages.iter().map(ExportRow::from_message).collect()
}

/// Default export name, `email_analysis_<YYYYmmdd_HHMMSS>.csv`
pub fn default_export_name(now: DateTime<Local>) -> String {
    format!("email_analysis_{}.csv", now.format("%Y%m%d_%H%M%S"))
}

/// Write the rows to `<output_dir>/<file_name>` and return the path
pub fn export_csv(
    messages: &[ProcessedMessage],
    output_dir: &Path,
    file_name: Option<&str>,
) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir).map_err(|e| {
        TriageError::ExportError(format!("cannot create {:?}: {}", output_dir, e))
    })?;

    let name = file_name
        .map(str::to_string)
        .unwrap_or_else(|| default_export_name(Local::now()));
    let path = output_dir.join(name);

    write_rows(&prepare_rows(messages), &path)?;
    tracing::info!("Exported {} row(s) to {:?}", messages.len(), path);
    Ok(path)
}

fn write_rows(rows: &[ExportRow], path: &Path) -> Result<()> {
    let to_export_error = |e: csv::Error| TriageError::ExportError(format!("{:?}: {}", path, e));

    let mut writer = csv::Writer::from_path(path).map_err(to_export_error)?;
    if rows.is_empty() {
        writer
            .write_record(["Sender", "Subject", "Date", "Email Summary", "Replied", "Draft Reply"])
            .map_err(to_export_error)?;
    }
    for row in rows {
        writer.serialize(row).map_err(to_export_error)?;
    }
    writer
        .flush()
        .map_err(|e| TriageError::ExportError(format!("{:?}: {}", path, e)))?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryStats {
    pub total: usize,
    pub replied: usize,
    pub unreplied: usize,
    pub reply_rate: String,
    pub unique_senders: usize,
    pub date_range: String,
    pub drafts_generated: usize,
}

impl SummaryStats {
    pub fn from_messages(messages: &[ProcessedMessage]) -> Self {
        let total = messages.len();
        let replied = messages.iter().filter(|m| m.replied).count();

        let reply_rate = if total == 0 {
            "0%".to_string()
        } else {
            format!("{:.1}%", replied as f64 / total as f64 * 100.0)
        };

        let unique_senders = messages
            .iter()
            .map(|m| sender_address(&m.sender))
            .collect::<HashSet<_>>()
            .len();

        let earliest = messages.iter().map(|m| m.received_at).min();
        let latest = messages.iter().map(|m| m.received_at).max();
        let date_range = match (earliest, latest) {
            (Some(from), Some(to)) => format!("{} to {}", day(from), day(to)),
            _ => "Unknown".to_string(),
        };

        let drafts_generated = messages
            .iter()
            .filter(|m| m.draft_reply.as_deref().is_some_and(|d| !d.trim().is_empty()))
            .count();

        Self {
            total,
            replied,
            unreplied: total - replied,
            reply_rate,
            unique_senders,
            date_range,
            drafts_generated,
        }
    }
}

fn day(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d").to_string()
}

pub fn render_summary(stats: &SummaryStats) -> String {
    let rule = "=".repeat(60);
    let mut out = String::new();
    let _ = writeln!(out, "\n{}", rule);
    let _ = writeln!(out, "EMAIL ANALYSIS SUMMARY");
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "Total Emails Analyzed:    {}", stats.total);
    let _ = writeln!(out, "Replied Emails:           {}", stats.replied);
    let _ = writeln!(out, "Unreplied Emails:         {}", stats.unreplied);
    let _ = writeln!(out, "Reply Rate:               {}", stats.reply_rate);
    let _ = writeln!(out, "Unique Senders:           {}", stats.unique_senders);
    let _ = writeln!(out, "Date Range:               {}", stats.date_range);
    let _ = writeln!(out, "Draft Replies Generated:  {}", stats.drafts_generated);
    let _ = writeln!(out, "{}", rule);
    out
}

/// Fixed-width table of the first messages
pub fn render_table(messages: &[ProcessedMessage]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "\n{:<30} {:<40} {:<16} {:<7}",
        "Sender", "Subject", "Date", "Replied"
    );
    let _ = writeln!(out, "{}", "-".repeat(96));

    for row in messages.iter().take(TABLE_LIMIT).map(ExportRow::from_message) {
        let _ = writeln!(
            out,
            "{:<30} {:<40} {:<16} {:<7}",
            truncate_string(&row.sender, 30),
            truncate_string(&row.subject, 40),
            row.date,
            row.replied
        );
    }

    if messages.len() > TABLE_LIMIT {
        let _ = writeln!(out, "... and {} more", messages.len() - TABLE_LIMIT);
    }
    out
}

/// Unreplied messages with their summaries and drafts
pub fn render_unreplied(messages: &[ProcessedMessage], show_drafts: bool) -> String {
    let unreplied: Vec<_> = messages.iter().filter(|m| !m.replied).collect();
    let mut out = String::new();

    if unreplied.is_empty() {
        let _ = writeln!(out, "\nNo unreplied emails.");
        return out;
    }

    let _ = writeln!(out, "\nUNREPLIED EMAILS ({})", unreplied.len());
    for (i, message) in unreplied.iter().take(UNREPLIED_LIMIT).enumerate() {
        let _ = writeln!(out, "\n{}. {}", i + 1, message.subject);
        let _ = writeln!(out, "   From: {}", display_sender(&message.sender));
        for line in message.summary.lines() {
            let _ = writeln!(out, "   {}", line);
        }
        if show_drafts {
            if let Some(draft) = &message.draft_reply {
                let _ = writeln!(out, "   Draft reply:");
                for line in draft.lines() {
                    let _ = writeln!(out, "     {}", line);
                }
            }
        }
    }

    if unreplied.len() > UNREPLIED_LIMIT {
        let _ = writeln!(out, "\n... and {} more", unreplied.len() - UNREPLIED_LIMIT);
    }
    out
}

pub fn display_results(messages: &[ProcessedMessage], show_drafts: bool) {
    print!("{}", render_summary(&SummaryStats::from_messages(messages)));
    print!("{}", render_table(messages));
    print!("{}", render_unreplied(messages, show_drafts));
}
