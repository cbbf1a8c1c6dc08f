//! Mailbox access over the Gmail API with retry logic

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use google_gmail1::api::{Message, MessagePart};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::GmailHub;
use crate::error::{Result, TriageError};
use crate::models::{MailboxProfile, RawMessage, ThreadMessage};

const READONLY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";

/// Largest page the messages.list endpoint accepts
const LIST_PAGE_SIZE: u32 = 500;

const MAX_RETRIES: u32 = 3;

static SCRIPT_OR_STYLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)\s*>").unwrap());
static LINE_BREAK_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<br\s*/?>|</(p|div|tr|li|h[1-6])\s*>").unwrap());
static ANY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Read-only mailbox operations the triage pipeline needs
#[async_trait]
pub trait MailClient: Send + Sync {
    async fn get_profile(&self) -> Result<MailboxProfile>;

    /// Newest inbox message IDs, at most `max`; `days_back == 0` disables the date filter
    async fn list_recent_message_ids(&self, max: u32, days_back: u32) -> Result<Vec<String>>;

    async fn get_message(&self, id: &str) -> Result<RawMessage>;

    /// Thread entries in provider order
    async fn get_thread(&self, thread_id: &str) -> Result<Vec<ThreadMessage>>;
}

pub struct GmailMailClient {
    hub: GmailHub,
}

impl GmailMailClient {
    pub fn new(hub: GmailHub) -> Self {
        Self { hub }
    }

    /// Check if an error is retryable
    fn should_retry(error: &TriageError) -> bool {
        error.is_transient()
    }

    /// Execute an async operation with exponential backoff retry
    async fn with_retry<T, F, Fut>(
        operation_name: &str,
        max_retries: u32,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut delay = Duration::from_secs(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if Self::should_retry(&e) && attempts <= max_retries => {
                    // Honour the server's hint when it asks for a longer pause
                    if let TriageError::RateLimitExceeded { retry_after } = e {
                        delay = delay.max(Duration::from_secs(retry_after));
                    }
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation_name,
                        attempts,
                        max_retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, Duration::from_secs(30));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl MailClient for GmailMailClient {
    async fn get_profile(&self) -> Result<MailboxProfile> {
        let profile = Self::with_retry("get_profile", MAX_RETRIES, || async move {
            let (_, profile) = self
                .hub
                .users()
                .get_profile("me")
                .add_scope(READONLY_SCOPE)
                .doit()
                .await?;
            Ok(profile)
        })
        .await?;

        Ok(MailboxProfile {
            email_address: profile.email_address.unwrap_or_default(),
            messages_total: profile.messages_total.unwrap_or(0).max(0) as u64,
            threads_total: profile.threads_total.unwrap_or(0).max(0) as u64,
        })
    }

    async fn list_recent_message_ids(&self, max: u32, days_back: u32) -> Result<Vec<String>> {
        let query = recent_query(days_back, Utc::now());
        let query = query.as_deref();
        let mut all_ids: Vec<String> = Vec::new();
        let mut page_token: Option<String> = None;

        while (all_ids.len() as u32) < max {
            let remaining = (max - all_ids.len() as u32).min(LIST_PAGE_SIZE);
            let token = page_token.as_deref();

            let response = Self::with_retry("list_messages", MAX_RETRIES, || async move {
                let mut call = self
                    .hub
                    .users()
                    .messages_list("me")
                    .add_label_ids("INBOX")
                    .max_results(remaining);
                if let Some(q) = query {
                    call = call.q(q);
                }
                if let Some(token) = token {
                    call = call.page_token(token);
                }
                let (_, response) = call.add_scope(READONLY_SCOPE).doit().await?;
                Ok(response)
            })
            .await?;

            all_ids.extend(
                response
                    .messages
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|m| m.id),
            );

            page_token = response.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        all_ids.truncate(max as usize);
        debug!("Listed {} inbox message(s)", all_ids.len());
        Ok(all_ids)
    }

    async fn get_message(&self, id: &str) -> Result<RawMessage> {
        let message = Self::with_retry("get_message", MAX_RETRIES, || async move {
            let (_, message) = self
                .hub
                .users()
                .messages_get("me", id)
                .format("full")
                .add_scope(READONLY_SCOPE)
                .doit()
                .await?;
            Ok(message)
        })
        .await?;

        parse_raw_message(message)
    }

    async fn get_thread(&self, thread_id: &str) -> Result<Vec<ThreadMessage>> {
        let thread = Self::with_retry("get_thread", MAX_RETRIES, || async move {
            let (_, thread) = self
                .hub
                .users()
                .threads_get("me", thread_id)
                .format("metadata")
                .add_metadata_headers("From")
                .add_metadata_headers("Date")
                .add_scope(READONLY_SCOPE)
                .doit()
                .await?;
            Ok(thread)
        })
        .await?;

        Ok(thread
            .messages
            .unwrap_or_default()
            .iter()
            .map(parse_thread_message)
            .collect())
    }
}

/// `after:YYYY/MM/DD` for the window start, or no query at all
fn recent_query(days_back: u32, now: DateTime<Utc>) -> Option<String> {
    if days_back == 0 {
        return None;
    }
    let since = now - ChronoDuration::days(i64::from(days_back));
    Some(format!("after:{}", since.format("%Y/%m/%d")))
}

fn header_value(message: &Message, name: &str) -> Option<String> {
    message
        .payload
        .as_ref()?
        .headers
        .as_ref()?
        .iter()
        .find(|h| h.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(name)))
        .and_then(|h| h.value.clone())
}

fn internal_timestamp(message: &Message) -> Option<DateTime<Utc>> {
    message
        .internal_date
        .and_then(DateTime::<Utc>::from_timestamp_millis)
}

/// Parse an RFC 2822 (or RFC 3339) date header
fn parse_email_date(date_str: &str) -> Option<DateTime<Utc>> {
    let trimmed = date_str.trim();
    // Some senders append a zone comment: "... +0000 (UTC)"
    let without_comment = match trimmed.find(" (") {
        Some(pos) => &trimmed[..pos],
        None => trimmed,
    };

    DateTime::parse_from_rfc2822(without_comment)
        .or_else(|_| DateTime::parse_from_rfc3339(without_comment))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

fn parse_raw_message(message: Message) -> Result<RawMessage> {
    let id = message
        .id
        .clone()
        .ok_or_else(|| TriageError::InvalidMessageFormat("Missing message ID".to_string()))?;
    let thread_id = message
        .thread_id
        .clone()
        .ok_or_else(|| TriageError::InvalidMessageFormat("Missing thread ID".to_string()))?;

    let sender = header_value(&message, "From").unwrap_or_else(|| "Unknown".to_string());
    let subject = header_value(&message, "Subject").unwrap_or_else(|| "No Subject".to_string());
    let date_header = header_value(&message, "Date").unwrap_or_default();

    let received_at = internal_timestamp(&message)
        .or_else(|| parse_email_date(&date_header))
        .unwrap_or_else(Utc::now);

    let body = message
        .payload
        .as_ref()
        .map(extract_body)
        .unwrap_or_default();

    Ok(RawMessage {
        id,
        thread_id,
        sender,
        subject,
        date_header,
        body,
        received_at,
    })
}

fn parse_thread_message(message: &Message) -> ThreadMessage {
    let sender = header_value(message, "From").unwrap_or_default();
    let timestamp = internal_timestamp(message)
        .or_else(|| header_value(message, "Date").and_then(|d| parse_email_date(&d)));

    ThreadMessage { sender, timestamp }
}

/// Plain text part if present, otherwise the HTML part reduced to text
fn extract_body(payload: &MessagePart) -> String {
    if let Some(text) = find_part_text(payload, "text/plain") {
        return collapse_blank_lines(&text);
    }
    if let Some(html) = find_part_text(payload, "text/html") {
        return collapse_blank_lines(&strip_html(&html));
    }
    String::new()
}

fn find_part_text(part: &MessagePart, mime_type: &str) -> Option<String> {
    if part
        .mime_type
        .as_deref()
        .is_some_and(|m| m.eq_ignore_ascii_case(mime_type))
    {
        // google-gmail1 already base64url-decodes body data
        if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_ref()) {
            if !data.is_empty() {
                return Some(String::from_utf8_lossy(data).into_owned());
            }
        }
    }

    part.parts
        .iter()
        .flatten()
        .find_map(|child| find_part_text(child, mime_type))
}

fn strip_html(html: &str) -> String {
    let without_blocks = SCRIPT_OR_STYLE.replace_all(html, "");
    let with_breaks = LINE_BREAK_TAG.replace_all(&without_blocks, "\n");
    let text = ANY_TAG.replace_all(&with_breaks, "");

    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Trim trailing whitespace per line and squeeze runs of blank lines into one
fn collapse_blank_lines(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut previous_blank = false;

    for line in text.lines().map(str::trim_end) {
        let blank = line.trim().is_empty();
        if blank && previous_blank {
            continue;
        }
        out.push(if blank { "" } else { line });
        previous_blank = blank;
    }

    out.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use google_gmail1::api::{MessagePartBody, MessagePartHeader};

    fn header(name: &str, value: &str) -> MessagePartHeader {
        MessagePartHeader {
            name: Some(name.to_string()),
            value: Some(value.to_string()),
        }
    }

    fn part(mime_type: &str, data: &str) -> MessagePart {
        MessagePart {
            mime_type: Some(mime_type.to_string()),
            body: Some(MessagePartBody {
                data: Some(data.as_bytes().to_vec()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn multipart(parts: Vec<MessagePart>, headers: Vec<MessagePartHeader>) -> MessagePart {
        MessagePart {
            mime_type: Some("multipart/alternative".to_string()),
            headers: Some(headers),
            parts: Some(parts),
            ..Default::default()
        }
    }

    #[test]
    fn test_should_retry_transient_errors() {
        assert!(GmailMailClient::should_retry(&TriageError::ServerError {
            status: 503,
            message: "unavailable".to_string()
        }));
        assert!(GmailMailClient::should_retry(&TriageError::RateLimitExceeded {
            retry_after: 1
        }));
        assert!(GmailMailClient::should_retry(&TriageError::NetworkError(
            "connection reset".to_string()
        )));
        assert!(!GmailMailClient::should_retry(&TriageError::Forbidden(
            "insufficient scope".to_string()
        )));
    }

    #[test]
    fn test_recent_query() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        assert_eq!(recent_query(7, now).as_deref(), Some("after:2024/03/03"));
        assert_eq!(recent_query(0, now), None);
    }

    #[test]
    fn test_parse_email_date() {
        assert!(parse_email_date("Mon, 24 Nov 2025 10:30:00 +0000").is_some());
        assert!(parse_email_date("Mon, 24 Nov 2025 10:30:00 +0000 (UTC)").is_some());
        assert!(parse_email_date("2025-11-24T10:30:00Z").is_some());
        assert!(parse_email_date("yesterday-ish").is_none());
    }

    #[test]
    fn test_parse_raw_message_prefers_plain_text() {
        let message = Message {
            id: Some("m1".to_string()),
            thread_id: Some("t1".to_string()),
            internal_date: Some(1_700_000_000_000),
            payload: Some(multipart(
                vec![
                    part("text/html", "<p>HTML version</p>"),
                    part("text/plain", "Plain version\n\n\n\nSecond paragraph   "),
                ],
                vec![
                    header("From", "Alice <alice@example.com>"),
                    header("Subject", "Quarterly numbers"),
                    header("Date", "Tue, 14 Nov 2023 22:13:20 +0000"),
                ],
            )),
            ..Default::default()
        };

        let raw = parse_raw_message(message).unwrap();
        assert_eq!(raw.id, "m1");
        assert_eq!(raw.sender, "Alice <alice@example.com>");
        assert_eq!(raw.subject, "Quarterly numbers");
        assert_eq!(raw.body, "Plain version\n\nSecond paragraph");
        assert_eq!(raw.received_at.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_parse_raw_message_html_only_and_defaults() {
        let message = Message {
            id: Some("m2".to_string()),
            thread_id: Some("t2".to_string()),
            payload: Some(multipart(
                vec![part(
                    "text/html",
                    "<style>p{color:red}</style><p>Hello&nbsp;there</p><br><div>Tom &amp; Jerry</div>",
                )],
                vec![],
            )),
            ..Default::default()
        };

        let raw = parse_raw_message(message).unwrap();
        assert_eq!(raw.sender, "Unknown");
        assert_eq!(raw.subject, "No Subject");
        assert_eq!(raw.body, "Hello there\n\nTom & Jerry");
    }

    #[test]
    fn test_parse_raw_message_missing_id() {
        let err = parse_raw_message(Message::default()).unwrap_err();
        assert!(matches!(err, TriageError::InvalidMessageFormat(_)));
    }

    #[test]
    fn test_parse_thread_message_timestamp_sources() {
        let with_internal = Message {
            internal_date: Some(1_700_000_000_000),
            payload: Some(multipart(vec![], vec![header("From", "me@example.com")])),
            ..Default::default()
        };
        let parsed = parse_thread_message(&with_internal);
        assert_eq!(parsed.sender, "me@example.com");
        assert!(parsed.timestamp.is_some());

        let with_header = Message {
            payload: Some(multipart(
                vec![],
                vec![
                    header("From", "bob@example.com"),
                    header("Date", "Tue, 14 Nov 2023 22:13:20 +0000"),
                ],
            )),
            ..Default::default()
        };
        assert_eq!(
            parse_thread_message(&with_header).timestamp,
            Some(Utc.with_ymd_and_hms(2023, 11, 14, 22, 13, 20).unwrap())
        );

        let unparsable = Message {
            payload: Some(multipart(
                vec![],
                vec![header("From", "x@example.com"), header("Date", "not a date")],
            )),
            ..Default::default()
        };
        assert!(parse_thread_message(&unparsable).timestamp.is_none());
    }

    #[test]
    fn test_collapse_blank_lines() {
        assert_eq!(collapse_blank_lines("a\n\n\n\nb\n \n\nc"), "a\n\nb\n\nc");
        assert_eq!(collapse_blank_lines("\n\n  text  \n\n"), "text");
    }

    #[tokio::test]
    async fn test_with_retry_succeeds_after_transient_error() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = Arc::clone(&attempt_count);

        let result = GmailMailClient::with_retry("test_op", 3, || {
            let count = Arc::clone(&attempt_count_clone);
            async move {
                let current = count.fetch_add(1, Ordering::SeqCst);
                if current < 2 {
                    Err(TriageError::NetworkError("Connection timeout".to_string()))
                } else {
                    Ok("success".to_string())
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_fails_on_permanent_error() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = Arc::clone(&attempt_count);

        let result = GmailMailClient::with_retry("test_op", 3, || {
            let count = Arc::clone(&attempt_count_clone);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Err::<String, _>(TriageError::BadRequest("bad query".to_string()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempt_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_exhausts_all_retries() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = Arc::clone(&attempt_count);

        let result = GmailMailClient::with_retry("test_op", 2, || {
            let count = Arc::clone(&attempt_count_clone);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Err::<String, _>(TriageError::ServerError {
                    status: 500,
                    message: "boom".to_string(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(TriageError::ServerError { .. })));
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    }
}
