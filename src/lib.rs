//! Inbox Triage
//!
//! Summarizes recent Gmail messages, detects which threads still need an
//! answer, drafts replies for them, and exports the result as CSV.
//!
//! # Overview
//!
//! - **Authorization**: a cached credential is used when valid, refreshed when
//!   expired, and otherwise obtained through an ordered cascade of OAuth2
//!   mechanisms (loopback redirect across several ports, console code,
//!   headless redirect, manual code paste)
//! - **Mail access**: read-only profile, message, and thread lookups
//! - **Reply detection**: whether the mailbox owner answered after a message
//! - **Assistant**: language-model summaries and drafts with templated fallbacks
//! - **Report**: CSV export and a terminal summary
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use inbox_triage::{auth, config::Config, credential::CredentialStore};
//! use inbox_triage::oauth_flow::GoogleAuthorizationFlow;
//! use inbox_triage::orchestrator::Orchestrator;
//! use inbox_triage::prompt::ConsolePrompter;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!     let secret = auth::load_client_secret("credentials.json".as_ref()).await?;
//!
//!     let flow = GoogleAuthorizationFlow::new(
//!         secret,
//!         config.auth.scopes.clone(),
//!         config.auth.redirect_timeout(),
//!     );
//!     let orchestrator = Orchestrator::new(
//!         Arc::new(flow),
//!         CredentialStore::new(".inbox-triage/token.json"),
//!         Arc::new(ConsolePrompter),
//!         config.auth.clone(),
//!     );
//!
//!     let session = orchestrator.run().await?;
//!     let _hub = auth::build_gmail_hub(&session.credential)?;
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`assistant`] - Summaries and draft replies
//! - [`auth`] - Client secret loading and Gmail hub construction
//! - [`cli`] - Command-line interface and pipeline orchestration
//! - [`client`] - Read-only Gmail client with retry logic
//! - [`config`] - Configuration management
//! - [`credential`] - Credential type and on-disk store
//! - [`error`] - Error types and result aliases
//! - [`models`] - Core data structures
//! - [`oauth_flow`] - OAuth2 consent URL, code exchange, loopback capture, refresh
//! - [`orchestrator`] - Cache, refresh, and the authorization cascade
//! - [`prompt`] - Interactive hooks used during authorization
//! - [`reply`] - Reply detection
//! - [`report`] - CSV export and terminal output

pub mod assistant;
pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub mod credential;
pub mod error;
pub mod models;
pub mod oauth_flow;
pub mod orchestrator;
pub mod prompt;
pub mod reply;
pub mod report;

// Re-export commonly used types for convenience
pub use error::{FlowError, Result, TriageError};

// Core data models
pub use models::{MailboxProfile, ProcessedMessage, RawMessage, ThreadMessage};

// Config types
pub use config::{AiConfig, AuthConfig, Config, ExportConfig, MailConfig};

// Authorization
pub use credential::{Credential, CredentialStore};
pub use oauth_flow::{AuthorizationFlow, GoogleAuthorizationFlow, RedirectMode};
pub use orchestrator::{
    AuthSession, AuthState, AuthStrategy, CredentialSource, MechanismKind, Orchestrator,
};
pub use prompt::{AuthPrompter, ConsolePrompter};

// Client traits
pub use client::{GmailMailClient, MailClient};

// Assistant
pub use assistant::{CompletionBackend, DraftGenerator, OpenAiBackend, Summarizer};

// CLI types (for binary usage)
pub use cli::{Cli, Commands, ProgressReporter, Report};
