use chrono::{DateTime, Utc};

use crate::models::ThreadMessage;

/// Whether the mailbox owner answered in this thread after `reference`.
///
/// Single-message threads are never replied. Sender matching is a
/// case-insensitive substring test against the raw From header, and only a
/// strictly later timestamp counts. Entries without a timestamp are skipped.
pub fn has_reply_after(
    thread_messages: &[ThreadMessage],
    owner_address: &str,
    reference: DateTime<Utc>,
) -> bool {
    if thread_messages.len() <= 1 {
        return false;
    }

    let owner = owner_address.trim().to_lowercase();
    if owner.is_empty() {
        return false;
    }

    thread_messages.iter().any(|message| {
        message.timestamp.is_some_and(|ts| {
            ts > reference && message.sender.to_lowercase().contains(&owner)
        })
    })
}
