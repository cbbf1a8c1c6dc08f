//! User-facing hooks used by the authorization cascade

use inquire::InquireError;

use crate::error::FlowError;

/// Input/output points of the authorization cascade.
///
/// The orchestrator and the authorization flow talk to the user only through
/// this trait, so tests can script every interaction.
pub trait AuthPrompter: Send + Sync {
    /// Show the consent URL to the user
    fn present_url(&self, url: &str);

    /// Best-effort browser launch; returns false when no browser could be opened
    fn open_browser(&self, url: &str) -> bool;

    /// Ask for a pasted authorization code. An interrupt maps to `FlowError::Interrupted`.
    fn prompt_for_code(&self, message: &str) -> Result<String, FlowError>;

    /// Progress or outcome text
    fn report(&self, message: &str);
}

/// Terminal implementation backed by inquire and the system browser
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsolePrompter;

impl AuthPrompter for ConsolePrompter {
    fn present_url(&self, url: &str) {
        println!("\nOpen this URL to authorize access:\n\n  {}\n", url);
    }

    fn open_browser(&self, url: &str) -> bool {
        match opener::open(url) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Could not launch browser: {}", e);
                false
            }
        }
    }

    fn prompt_for_code(&self, message: &str) -> Result<String, FlowError> {
        inquire::Text::new(message)
            .with_help_message("Paste the code shown after granting access (Esc or Ctrl-C to abort)")
            .prompt()
            .map(|code| code.trim().to_string())
            .map_err(map_inquire_error)
    }

    fn report(&self, message: &str) {
        println!("{}", message);
    }
}

fn map_inquire_error(error: InquireError) -> FlowError {
    match error {
        InquireError::OperationCanceled | InquireError::OperationInterrupted => {
            FlowError::Interrupted
        }
        other => FlowError::UserInputInvalid(other.to_string()),
    }
}
