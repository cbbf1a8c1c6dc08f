//! Language-model summaries and reply drafts with deterministic fallbacks

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::AiConfig;
use crate::error::{Result, TriageError};
use crate::models::{display_sender, sender_address, sender_name};

const SUMMARY_BODY_CHARS: usize = 1500;
const DRAFT_BODY_CHARS: usize = 800;
const PREVIEW_CHARS: usize = 100;
/// Bodies and drafts shorter than this carry no usable content
const MIN_MEANINGFUL_CHARS: usize = 10;

/// Single-turn text completion
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, prompt: &str, max_tokens: u16, temperature: f32) -> Result<String>;
}

/// Chat completions against any OpenAI-compatible endpoint (Groq by default)
pub struct OpenAiBackend {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiBackend {
    pub fn new(config: &AiConfig, api_key: impl Into<String>) -> Self {
        let client = Client::with_config(
            OpenAIConfig::new()
                .with_api_key(api_key)
                .with_api_base(&config.api_base),
        );
        Self {
            client,
            model: config.model.clone(),
        }
    }
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    async fn complete(&self, prompt: &str, max_tokens: u16, temperature: f32) -> Result<String> {
        let message: ChatCompletionRequestMessage = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()
            .map_err(|e| TriageError::CompletionError(e.to_string()))?
            .into();

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![message])
            .temperature(temperature)
            .max_tokens(max_tokens)
            .build()
            .map_err(|e| TriageError::CompletionError(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| TriageError::CompletionError(e.to_string()))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| TriageError::CompletionError("empty completion".to_string()))
    }
}

/// Bullet-point summaries; never fails
pub struct Summarizer {
    backend: Arc<dyn CompletionBackend>,
    max_tokens: u16,
    temperature: f32,
}

impl Summarizer {
    pub fn new(backend: Arc<dyn CompletionBackend>, config: &AiConfig) -> Self {
        Self {
            backend,
            max_tokens: config.summary_max_tokens,
            temperature: config.summary_temperature,
        }
    }

    pub async fn summarize(&self, subject: &str, body: &str, sender: &str) -> String {
        let prompt = format!(
            "Summarize this email in 2-3 short, clear bullet points. Be concise and direct.\n\n\
             Email Details:\nFrom: {}\nSubject: {}\nContent: {}\n\n\
             Focus only on the main point and any important actions/deadlines.",
            sender,
            subject,
            truncate_chars(body, SUMMARY_BODY_CHARS)
        );

        match self
            .backend
            .complete(&prompt, self.max_tokens, self.temperature)
            .await
        {
            Ok(text) => {
                let bullets = normalize_bullets(&text);
                if bullets.is_empty() {
                    fallback_summary(subject, body, sender)
                } else {
                    bullets
                }
            }
            Err(e) => {
                tracing::warn!("Summary generation failed, using template: {}", e);
                fallback_summary(subject, body, sender)
            }
        }
    }
}

/// Reply drafts for unanswered messages; never fails
pub struct DraftGenerator {
    backend: Arc<dyn CompletionBackend>,
    max_tokens: u16,
    temperature: f32,
}

impl DraftGenerator {
    pub fn new(backend: Arc<dyn CompletionBackend>, config: &AiConfig) -> Self {
        Self {
            backend,
            max_tokens: config.draft_max_tokens,
            temperature: config.draft_temperature,
        }
    }

    pub async fn draft_reply(&self, subject: &str, body: &str, sender: &str) -> String {
        let context = if body.trim().chars().count() < MIN_MEANINGFUL_CHARS {
            format!("Email regarding: {}", subject)
        } else {
            truncate_chars(body, DRAFT_BODY_CHARS)
        };

        let prompt = format!(
            "Write a professional email reply for this message. Be concise, polite, and appropriate to the context.\n\n\
             From: {}\nSubject: {}\nBody: {}\n\nWrite a brief professional reply:",
            sender, subject, context
        );

        match self
            .backend
            .complete(&prompt, self.max_tokens, self.temperature)
            .await
        {
            Ok(text) if text.trim().chars().count() >= MIN_MEANINGFUL_CHARS => {
                let text = text.trim();
                if text.starts_with("Subject:") {
                    text.to_string()
                } else {
                    format!("Subject: {}\n\n{}", reply_subject(subject), text)
                }
            }
            Ok(_) => {
                tracing::warn!("Draft for '{}' was too short, using template", subject);
                fallback_draft(subject, sender)
            }
            Err(e) => {
                tracing::warn!("Draft generation failed, using template: {}", e);
                fallback_draft(subject, sender)
            }
        }
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

/// Every non-empty line starts with `•`; lines already starting with `-` are kept
fn normalize_bullets(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            if line.starts_with('•') || line.starts_with('-') {
                line.to_string()
            } else {
                format!("• {}", line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn reply_subject(subject: &str) -> String {
    if subject.trim_start().to_lowercase().starts_with("re:") {
        subject.to_string()
    } else {
        format!("Re: {}", subject)
    }
}

/// Name used in greetings: display name, else the capitalised local part
fn greeting_name(sender: &str) -> String {
    if let Some(name) = sender_name(sender) {
        return name;
    }
    let address = sender_address(sender);
    let local = address
        .split('@')
        .next()
        .and_then(|local| local.split('.').next())
        .unwrap_or("");

    let mut chars = local.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => "there".to_string(),
    }
}

pub fn fallback_summary(subject: &str, body: &str, sender: &str) -> String {
    let clean_body = body.split_whitespace().collect::<Vec<_>>().join(" ");
    let preview = if clean_body.is_empty() {
        "No content available".to_string()
    } else if clean_body.chars().count() > PREVIEW_CHARS {
        format!("{}...", truncate_chars(&clean_body, PREVIEW_CHARS))
    } else {
        clean_body
    };

    format!(
        "• Email from {} about {}\n• {}",
        display_sender(sender),
        subject,
        preview
    )
}

pub fn fallback_draft(subject: &str, sender: &str) -> String {
    format!(
        "To: {}\nSubject: {}\n\nHi {},\n\nThank you for your email regarding \"{}\".\n\n\
         I have received your message and will review it shortly. \
         I'll get back to you with a response as soon as possible.\n\nBest regards",
        sender.trim(),
        reply_subject(subject),
        greeting_name(sender),
        subject
    )
}
