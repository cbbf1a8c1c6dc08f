use anyhow::Result;
use clap::Parser;
use inbox_triage::cli::{self, Cli, Commands};
use inbox_triage::config::Config;
use inbox_triage::error::TriageError;
use indicatif::MultiProgress;
use std::io::Write;
use std::process;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// A writer that prints through MultiProgress to avoid progress bar conflicts
#[derive(Clone)]
struct MultiProgressWriter {
    multi: Arc<MultiProgress>,
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MultiProgressWriter {
    fn new(multi: Arc<MultiProgress>) -> Self {
        Self {
            multi,
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Write for MultiProgressWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Ok(mut buffer) = self.buffer.lock() {
            buffer.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let Ok(mut buffer) = self.buffer.lock() else {
            return Ok(());
        };
        if !buffer.is_empty() {
            let msg = String::from_utf8_lossy(&buffer);
            let msg = msg.trim_end_matches('\n');
            if !msg.is_empty() {
                let _ = self.multi.println(msg);
            }
            buffer.clear();
        }
        Ok(())
    }
}

impl Drop for MultiProgressWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// MakeWriter implementation for tracing
#[derive(Clone)]
struct MultiProgressMakeWriter {
    multi: Arc<MultiProgress>,
}

impl<'a> MakeWriter<'a> for MultiProgressMakeWriter {
    type Writer = MultiProgressWriter;

    fn make_writer(&'a self) -> Self::Writer {
        MultiProgressWriter::new(Arc::clone(&self.multi))
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        if let Some(TriageError::OperationCancelled(reason)) = e.downcast_ref::<TriageError>() {
            eprintln!("\nCancelled: {}", reason);
            process::exit(130);
        }
        display_error(&e);
        eprintln!("\nFor help, run: inbox-triage --help");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Install default crypto provider for rustls
    // On non-Windows platforms, use aws-lc-rs; on Windows, use ring
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("inbox_triage=debug,info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("inbox_triage=info,warn"))
    };

    // Logs print above progress bars
    let multi_progress = Arc::new(MultiProgress::new());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(MultiProgressMakeWriter {
            multi: Arc::clone(&multi_progress),
        })
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    match &cli.command {
        Commands::Auth { force } => {
            tracing::info!("Authorizing mailbox access...");
            let profile = cli::run_auth(&cli, *force).await?;
            println!("Connected to account: {}", profile.email_address);
            println!(
                "Mailbox holds {} messages in {} threads",
                profile.messages_total, profile.threads_total
            );
            Ok(())
        }

        Commands::Run {
            max_emails,
            days_back,
            skip_reply_check,
            no_drafts,
            output,
        } => {
            tracing::info!("Starting triage run");
            let report = cli::run_pipeline(
                &cli,
                *max_emails,
                *days_back,
                *skip_reply_check,
                *no_drafts,
                output.as_deref(),
                (*multi_progress).clone(),
            )
            .await?;

            println!("\n========================================");
            println!("Triage Run Summary");
            println!("========================================");
            println!("Mailbox: {}", report.mailbox);
            println!("Authorized via: {}", report.auth_source);
            if !report.credential_persisted {
                println!("Credential was not cached; you will be asked to authorize next run");
            }
            println!("Duration: {} seconds", report.duration_seconds);
            println!("Emails analyzed: {}", report.emails_fetched);
            println!("Emails skipped: {}", report.emails_skipped);
            println!("Replied: {}", report.replied);
            println!("Unreplied: {}", report.unreplied);
            println!("Drafts generated: {}", report.drafts_generated);
            println!("Exported to: {}", report.export_path.display());
            println!("========================================");
            Ok(())
        }

        Commands::InitConfig { output, force } => {
            tracing::info!("Generating example configuration file");

            if output.exists() && !force {
                return Err(TriageError::ConfigError(format!(
                    "Configuration file already exists at {:?}. Use --force to overwrite.",
                    output
                ))
                .into());
            }

            Config::create_example(output).await?;

            println!("Created example configuration file at: {:?}", output);
            println!("\nKey settings to review:");
            println!("  - auth.candidate_ports: loopback ports tried in order (0 = any free port)");
            println!("  - mail.max_emails / mail.days_back: how much mail to analyze");
            println!("  - ai.api_key_env: environment variable holding the language-model key");
            println!("  - export.output_dir: where CSV reports are written");
            Ok(())
        }
    }
}

/// Display error with context
fn display_error(error: &anyhow::Error) {
    eprintln!("Error: {}", error);

    let mut cause = error.source();
    while let Some(e) = cause {
        eprintln!("  Caused by: {}", e);
        cause = e.source();
    }

    if let Some(triage_err) = error.downcast_ref::<TriageError>() {
        match triage_err {
            TriageError::AllMechanismsExhausted(_) | TriageError::AuthError(_) => {
                eprintln!("\nHint: Make sure your credentials.json file is a Desktop-app OAuth client.");
                eprintln!("      You can download it from Google Cloud Console.");
                eprintln!("      Try running: inbox-triage auth --force");
            }
            TriageError::ApiError(_) | TriageError::ServerError { .. } => {
                eprintln!("\nHint: This may be a temporary API error.");
                eprintln!("      Try running the command again.");
            }
            TriageError::RateLimitExceeded { .. } => {
                eprintln!("\nHint: You've hit Gmail API rate limits.");
                eprintln!("      Wait a few seconds and try again, or lower --max-emails.");
            }
            TriageError::ConfigError(_) => {
                eprintln!("\nHint: Check your configuration file and environment variables.");
                eprintln!("      Run: inbox-triage init-config --force");
            }
            _ => {}
        }
    }
}
