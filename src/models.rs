use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static EMAIL_ADDRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<?([a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,})>?").unwrap());

/// Mailbox owner profile
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MailboxProfile {
    pub email_address: String,
    pub messages_total: u64,
    pub threads_total: u64,
}

/// A message as fetched from the provider, before enrichment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    pub id: String,
    pub thread_id: String,
    pub sender: String,
    pub subject: String,
    pub date_header: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

/// One entry of a thread, reduced to what reply detection needs.
///
/// `timestamp` is `None` when neither the internal date nor the Date header parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub sender: String,
    pub timestamp: Option<DateTime<Utc>>,
}

/// A message moving through the triage pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedMessage {
    pub id: String,
    pub thread_id: String,
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
    pub replied: bool,
    pub summary: String,
    pub draft_reply: Option<String>,
}

impl ProcessedMessage {
    /// Build from a fetched message, capping the body at `body_char_limit` characters
    pub fn from_raw(raw: RawMessage, body_char_limit: usize) -> Self {
        let body = if raw.body.chars().count() > body_char_limit {
            raw.body.chars().take(body_char_limit).collect()
        } else {
            raw.body
        };

        Self {
            id: raw.id,
            thread_id: raw.thread_id,
            sender: raw.sender,
            subject: raw.subject,
            body,
            received_at: raw.received_at,
            replied: false,
            summary: String::new(),
            draft_reply: None,
        }
    }

    pub fn needs_draft(&self) -> bool {
        !self.replied && self.draft_reply.is_none()
    }
}

/// Email address from a From header, lowercased; the trimmed header when none is found
pub fn sender_address(from_header: &str) -> String {
    EMAIL_ADDRESS
        .captures(from_header)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_lowercase())
        .unwrap_or_else(|| from_header.trim().to_string())
}

/// Display name before `<address>`, without quotes
pub fn sender_name(from_header: &str) -> Option<String> {
    let pos = from_header.find('<')?;
    let name = from_header[..pos].trim().trim_matches('"').trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// `Name (address)` when a display name exists, otherwise the bare address
pub fn display_sender(from_header: &str) -> String {
    let address = sender_address(from_header);
    match sender_name(from_header) {
        Some(name) => format!("{} ({})", name, address),
        None => address,
    }
}
