//! Command-line interface and pipeline orchestration

use chrono::Utc;
use clap::{Parser, Subcommand};
use google_gmail1::yup_oauth2::ApplicationSecret;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::assistant::{CompletionBackend, DraftGenerator, OpenAiBackend, Summarizer};
use crate::auth::{self, load_client_secret};
use crate::client::{GmailMailClient, MailClient};
use crate::config::{Config, MailConfig};
use crate::credential::CredentialStore;
use crate::error::Result;
use crate::models::{MailboxProfile, ProcessedMessage};
use crate::oauth_flow::GoogleAuthorizationFlow;
use crate::orchestrator::{AuthSession, CredentialSource, Orchestrator};
use crate::prompt::ConsolePrompter;
use crate::reply::has_reply_after;
use crate::report::{display_results, export_csv};

#[derive(Parser, Debug)]
#[command(name = "inbox-triage")]
#[command(version = "0.1.0")]
#[command(about = "Summarize recent email, detect unanswered threads, and draft replies", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Path to OAuth2 client secret file (falls back to GMAIL_CLIENT_ID / GMAIL_CLIENT_SECRET)
    #[arg(long, default_value = "credentials.json")]
    pub credentials: PathBuf,

    /// Path to token cache file
    #[arg(long, default_value = ".inbox-triage/token.json")]
    pub token_cache: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authorize mailbox access and cache the credential
    Auth {
        /// Discard the cached credential and authorize again
        #[arg(long)]
        force: bool,
    },

    /// Fetch, analyze, and export recent email
    Run {
        /// Number of recent emails to analyze (capped by mail.max_email_limit)
        #[arg(short = 'n', long)]
        max_emails: Option<u32>,

        /// Only look at email from the last N days (0 disables the filter)
        #[arg(short, long)]
        days_back: Option<u32>,

        /// Treat every email as unreplied instead of inspecting threads
        #[arg(long)]
        skip_reply_check: bool,

        /// Do not generate draft replies
        #[arg(long)]
        no_drafts: bool,

        /// CSV file name, or a path whose directory overrides export.output_dir
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

/// Progress reporter using indicatif
pub struct ProgressReporter {
    multi: MultiProgress,
    spinner_style: ProgressStyle,
    bar_style: ProgressStyle,
    echo: bool,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::build(MultiProgress::new(), true)
    }

    /// Share a MultiProgress with the log writer so log lines print above the bars
    pub fn with_multi_progress(multi: MultiProgress) -> Self {
        Self::build(multi, true)
    }

    /// Draws nothing and prints nothing
    pub fn hidden() -> Self {
        Self::build(MultiProgress::with_draw_target(ProgressDrawTarget::hidden()), false)
    }

    fn build(multi: MultiProgress, echo: bool) -> Self {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        let bar_style = ProgressStyle::default_bar()
            .template("[{elapsed:>6}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");

        Self {
            multi,
            spinner_style,
            bar_style,
            echo,
        }
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    pub fn add_progress_bar(&self, len: u64, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new(len));
        pb.set_style(self.bar_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Finish a spinner and clear it from the multi-progress display
    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        self.done(msg);
    }

    /// Finish a bar and print its completion line
    pub fn finish_bar(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        self.done(msg);
    }

    fn done(&self, msg: &str) {
        if self.echo {
            let _ = self.multi.println(format!("  ✓ {}", msg));
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-run processing knobs, resolved from config plus command-line overrides
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriageOptions {
    pub max_emails: u32,
    pub days_back: u32,
    pub body_char_limit: usize,
    pub check_replies: bool,
    pub generate_drafts: bool,
}

impl TriageOptions {
    pub fn resolve(
        mail: &MailConfig,
        max_emails: Option<u32>,
        days_back: Option<u32>,
        skip_reply_check: bool,
        no_drafts: bool,
    ) -> Self {
        Self {
            max_emails: mail.effective_max_emails(max_emails),
            days_back: days_back.unwrap_or(mail.days_back),
            body_char_limit: mail.body_char_limit,
            check_replies: mail.check_replies && !skip_reply_check,
            generate_drafts: mail.generate_drafts && !no_drafts,
        }
    }
}

/// Analyzed messages plus the mailbox they came from
#[derive(Debug, Clone)]
pub struct TriageOutcome {
    pub profile: MailboxProfile,
    pub messages: Vec<ProcessedMessage>,
    pub skipped: usize,
}

pub struct Report {
    pub started_at: chrono::DateTime<Utc>,
    pub completed_at: chrono::DateTime<Utc>,
    pub duration_seconds: i64,
    pub mailbox: String,
    pub auth_source: CredentialSource,
    pub credential_persisted: bool,
    pub emails_fetched: usize,
    pub emails_skipped: usize,
    pub replied: usize,
    pub unreplied: usize,
    pub drafts_generated: usize,
    pub export_path: PathBuf,
}

/// Client secret plus the language-model key; both are required before any network work
pub async fn check_prerequisites(cli: &Cli, config: &Config) -> Result<(ApplicationSecret, String)> {
    let secret = load_client_secret(&cli.credentials).await?;
    let api_key = config.ai.api_key()?;
    Ok((secret, api_key))
}

/// Run the credential cascade with console hooks
pub async fn authenticate(
    cli: &Cli,
    config: &Config,
    secret: ApplicationSecret,
    force: bool,
) -> Result<AuthSession> {
    let store = CredentialStore::new(&cli.token_cache);
    if force {
        store.clear().await?;
    }

    let flow = GoogleAuthorizationFlow::new(
        secret,
        config.auth.scopes.clone(),
        config.auth.redirect_timeout(),
    );
    let orchestrator = Orchestrator::new(
        Arc::new(flow),
        store,
        Arc::new(ConsolePrompter),
        config.auth.clone(),
    );

    let session = orchestrator.run().await?;
    tracing::info!(
        "Credential ready (source: {}, attempts: {}, persisted: {})",
        session.source,
        session.attempts.len(),
        session.persisted
    );
    Ok(session)
}

/// `auth`: obtain a credential and confirm it against the mailbox
pub async fn run_auth(cli: &Cli, force: bool) -> Result<MailboxProfile> {
    let config = Config::load(&cli.config).await?;
    let secret = load_client_secret(&cli.credentials).await?;

    let session = authenticate(cli, &config, secret, force).await?;
    let hub = auth::build_gmail_hub(&session.credential)?;
    let client = GmailMailClient::new(hub);
    let profile = client.get_profile().await?;

    println!("Authorized via {}", session.source);
    if session.persisted || matches!(session.source, CredentialSource::Cache) {
        println!("Token cached at: {:?}", cli.token_cache);
    }
    Ok(profile)
}

/// Fetch, classify, summarize, and draft, one message at a time
pub async fn triage_messages(
    client: &dyn MailClient,
    summarizer: &Summarizer,
    drafter: &DraftGenerator,
    options: &TriageOptions,
    reporter: &ProgressReporter,
) -> Result<TriageOutcome> {
    // Step 1: Mailbox owner
    let profile = client.get_profile().await?;
    tracing::info!(
        "Mailbox {} ({} messages, {} threads)",
        profile.email_address,
        profile.messages_total,
        profile.threads_total
    );

    // Step 2: List and fetch
    let list_spinner = reporter.add_spinner("Listing recent inbox messages...");
    let ids = client
        .list_recent_message_ids(options.max_emails, options.days_back)
        .await?;
    reporter.finish_spinner(&list_spinner, &format!("Found {} messages to analyze", ids.len()));

    let fetch_bar = reporter.add_progress_bar(ids.len() as u64, "Fetching messages...");
    let mut messages = Vec::with_capacity(ids.len());
    let mut skipped = 0;
    for id in &ids {
        match client.get_message(id).await {
            Ok(raw) => messages.push(ProcessedMessage::from_raw(raw, options.body_char_limit)),
            Err(e) => {
                skipped += 1;
                tracing::warn!("Skipping message {}: {}", id, e);
            }
        }
        fetch_bar.inc(1);
    }
    reporter.finish_bar(
        &fetch_bar,
        &format!("Fetched {} messages ({} skipped)", messages.len(), skipped),
    );

    // Step 3: Reply detection
    if options.check_replies {
        let reply_bar = reporter.add_progress_bar(messages.len() as u64, "Checking replies...");
        for message in messages.iter_mut() {
            message.replied = match client.get_thread(&message.thread_id).await {
                Ok(thread) => has_reply_after(&thread, &profile.email_address, message.received_at),
                Err(e) => {
                    tracing::warn!("Thread {} unavailable, treating as unreplied: {}", message.thread_id, e);
                    false
                }
            };
            reply_bar.inc(1);
        }
        let replied = messages.iter().filter(|m| m.replied).count();
        reporter.finish_bar(&reply_bar, &format!("{} of {} already replied", replied, messages.len()));
    } else {
        tracing::info!("Reply check skipped; all messages treated as unreplied");
    }

    // Step 4: Summaries
    let summary_bar = reporter.add_progress_bar(messages.len() as u64, "Summarizing...");
    for message in messages.iter_mut() {
        message.summary = summarizer
            .summarize(&message.subject, &message.body, &message.sender)
            .await;
        summary_bar.inc(1);
    }
    reporter.finish_bar(&summary_bar, &format!("Summarized {} messages", messages.len()));

    // Step 5: Drafts for unreplied mail
    if options.generate_drafts {
        let pending = messages.iter().filter(|m| m.needs_draft()).count();
        let draft_bar = reporter.add_progress_bar(pending as u64, "Drafting replies...");
        for message in messages.iter_mut().filter(|m| m.needs_draft()) {
            let draft = drafter
                .draft_reply(&message.subject, &message.body, &message.sender)
                .await;
            message.draft_reply = Some(draft);
            draft_bar.inc(1);
        }
        reporter.finish_bar(&draft_bar, &format!("Drafted {} replies", pending));
    }

    Ok(TriageOutcome {
        profile,
        messages,
        skipped,
    })
}

/// Split `--output` into an export directory and file name
fn export_target(output: Option<&Path>, default_dir: &str) -> (PathBuf, Option<String>) {
    let Some(output) = output else {
        return (PathBuf::from(default_dir), None);
    };

    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().to_string());
    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from(default_dir),
    };
    (dir, name)
}

/// Run the complete pipeline
#[allow(clippy::too_many_arguments)]
pub async fn run_pipeline(
    cli: &Cli,
    max_emails: Option<u32>,
    days_back: Option<u32>,
    skip_reply_check: bool,
    no_drafts: bool,
    output: Option<&Path>,
    multi: MultiProgress,
) -> Result<Report> {
    let started_at = Utc::now();

    // Step 1: Load configuration
    let config = Config::load(&cli.config).await?;
    let options = TriageOptions::resolve(&config.mail, max_emails, days_back, skip_reply_check, no_drafts);
    tracing::debug!("Triage options: {:?}", options);

    // Step 2: Prerequisites
    let (secret, api_key) = check_prerequisites(cli, &config).await?;

    // Step 3: Authorization (interactive, so no spinner)
    println!("Authorizing mailbox access...");
    let session = authenticate(cli, &config, secret, false).await?;
    println!("  ✓ Authorized via {}", session.source);

    // Step 4: Mailbox client and language-model backend
    let hub = auth::build_gmail_hub(&session.credential)?;
    let client = GmailMailClient::new(hub);
    let backend: Arc<dyn CompletionBackend> = Arc::new(OpenAiBackend::new(&config.ai, api_key));
    let summarizer = Summarizer::new(Arc::clone(&backend), &config.ai);
    let drafter = DraftGenerator::new(backend, &config.ai);

    // Step 5: Triage
    let reporter = ProgressReporter::with_multi_progress(multi);
    let outcome = triage_messages(&client, &summarizer, &drafter, &options, &reporter).await?;
    drop(reporter);

    // Step 6: Display
    display_results(&outcome.messages, options.generate_drafts);

    // Step 7: Export
    let (dir, file_name) = export_target(output, &config.export.output_dir);
    let export_path = export_csv(&outcome.messages, &dir, file_name.as_deref())?;

    let completed_at = Utc::now();
    let replied = outcome.messages.iter().filter(|m| m.replied).count();
    Ok(Report {
        started_at,
        completed_at,
        duration_seconds: (completed_at - started_at).num_seconds(),
        mailbox: outcome.profile.email_address,
        auth_source: session.source,
        credential_persisted: session.persisted,
        emails_fetched: outcome.messages.len(),
        emails_skipped: outcome.skipped,
        replied,
        unreplied: outcome.messages.len() - replied,
        drafts_generated: outcome
            .messages
            .iter()
            .filter(|m| m.draft_reply.is_some())
            .count(),
        export_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run_overrides() {
        let cli = Cli::try_parse_from([
            "inbox-triage",
            "--token-cache",
            "/tmp/tok.json",
            "run",
            "--max-emails",
            "25",
            "--days-back",
            "3",
            "--skip-reply-check",
            "--output",
            "out/report.csv",
        ])
        .unwrap();

        assert_eq!(cli.token_cache, PathBuf::from("/tmp/tok.json"));
        assert_eq!(cli.config, PathBuf::from("config.toml"));
        match cli.command {
            Commands::Run {
                max_emails,
                days_back,
                skip_reply_check,
                no_drafts,
                output,
            } => {
                assert_eq!(max_emails, Some(25));
                assert_eq!(days_back, Some(3));
                assert!(skip_reply_check);
                assert!(!no_drafts);
                assert_eq!(output, Some(PathBuf::from("out/report.csv")));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_auth_defaults() {
        let cli = Cli::try_parse_from(["inbox-triage", "auth", "--force"]).unwrap();
        assert_eq!(cli.token_cache, PathBuf::from(".inbox-triage/token.json"));
        assert!(matches!(cli.command, Commands::Auth { force: true }));
    }

    #[test]
    fn test_options_resolve() {
        let mail = MailConfig::default();

        let options = TriageOptions::resolve(&mail, Some(1_000), None, false, true);
        assert_eq!(options.max_emails, mail.max_email_limit);
        assert_eq!(options.days_back, mail.days_back);
        assert!(options.check_replies);
        assert!(!options.generate_drafts);

        let options = TriageOptions::resolve(&mail, None, Some(0), true, false);
        assert_eq!(options.max_emails, mail.max_emails);
        assert_eq!(options.days_back, 0);
        assert!(!options.check_replies);
        assert!(options.generate_drafts);
    }

    #[test]
    fn test_export_target() {
        assert_eq!(export_target(None, "output"), (PathBuf::from("output"), None));
        assert_eq!(
            export_target(Some(Path::new("mine.csv")), "output"),
            (PathBuf::from("output"), Some("mine.csv".to_string()))
        );
        assert_eq!(
            export_target(Some(Path::new("/tmp/x/mine.csv")), "output"),
            (PathBuf::from("/tmp/x"), Some("mine.csv".to_string()))
        );
    }
}
