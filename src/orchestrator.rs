//! Credential acquisition: cache, refresh, then an ordered cascade of
//! authorization mechanisms.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::config::AuthConfig;
use crate::credential::{Credential, CredentialStore};
use crate::error::{FlowError, Result, TriageError};
use crate::oauth_flow::{AuthorizationFlow, RedirectMode};
use crate::prompt::AuthPrompter;

/// Orchestration states, in the order a run can visit them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    CheckingCache,
    Refreshing,
    Cascading,
    Persisting,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MechanismKind {
    /// Loopback capture with the browser opened automatically
    LocalRedirect,
    /// Out-of-band code printed by the provider and pasted back once
    ConsoleCode,
    /// Loopback capture without launching a browser
    HeadlessRedirect,
    /// Out-of-band code with a bounded number of paste attempts
    ManualCode,
}

impl fmt::Display for MechanismKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MechanismKind::LocalRedirect => "local redirect",
            MechanismKind::ConsoleCode => "console code",
            MechanismKind::HeadlessRedirect => "headless redirect",
            MechanismKind::ManualCode => "manual code",
        };
        f.write_str(name)
    }
}

/// Where the session credential came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Cache,
    Refresh,
    Mechanism(MechanismKind),
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Cache => f.write_str("cached credential"),
            CredentialSource::Refresh => f.write_str("token refresh"),
            CredentialSource::Mechanism(kind) => write!(f, "{}", kind),
        }
    }
}

pub enum AttemptOutcome {
    Success(Credential),
    /// The cascade moves on to the next mechanism
    Recoverable(FlowError),
    /// The whole orchestration stops
    Unrecoverable(FlowError),
}

/// Collaborators available to a strategy during one attempt
pub struct AttemptContext<'a> {
    pub flow: &'a dyn AuthorizationFlow,
    pub prompter: &'a dyn AuthPrompter,
}

/// One step of the cascade
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    fn kind(&self) -> MechanismKind;

    fn describe(&self) -> String;

    async fn attempt(&self, ctx: &AttemptContext<'_>) -> AttemptOutcome;
}

/// Record of one mechanism attempt within a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub mechanism: MechanismKind,
    pub description: String,
    pub error: Option<FlowError>,
}

/// Result of a successful orchestration
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub credential: Credential,
    pub source: CredentialSource,
    pub attempts: Vec<AttemptRecord>,
    /// False when the credential could not be written to the store
    pub persisted: bool,
    pub states: Vec<AuthState>,
}

impl AuthSession {
    pub fn visited(&self, state: AuthState) -> bool {
        self.states.contains(&state)
    }
}

fn settle(result: std::result::Result<Credential, FlowError>) -> AttemptOutcome {
    match result {
        Ok(credential) => AttemptOutcome::Success(credential),
        Err(e) if e.is_recoverable() => AttemptOutcome::Recoverable(e),
        Err(e) => AttemptOutcome::Unrecoverable(e),
    }
}

/// Loopback capture on one port; port 0 lets the OS pick
pub struct LocalRedirectStrategy {
    pub port: u16,
    pub open_browser: bool,
}

#[async_trait]
impl AuthStrategy for LocalRedirectStrategy {
    fn kind(&self) -> MechanismKind {
        if self.open_browser {
            MechanismKind::LocalRedirect
        } else {
            MechanismKind::HeadlessRedirect
        }
    }

    fn describe(&self) -> String {
        match (self.port, self.open_browser) {
            (0, true) => "local redirect on an OS-assigned port".to_string(),
            (port, true) => format!("local redirect on port {}", port),
            (port, false) => format!("headless local redirect on port {}", port),
        }
    }

    async fn attempt(&self, ctx: &AttemptContext<'_>) -> AttemptOutcome {
        settle(
            ctx.flow
                .capture_via_local_redirect(self.port, self.open_browser, ctx.prompter)
                .await,
        )
    }
}

/// Print an out-of-band consent URL and accept one pasted code
pub struct ConsoleCodeStrategy;

#[async_trait]
impl AuthStrategy for ConsoleCodeStrategy {
    fn kind(&self) -> MechanismKind {
        MechanismKind::ConsoleCode
    }

    fn describe(&self) -> String {
        "console code exchange".to_string()
    }

    async fn attempt(&self, ctx: &AttemptContext<'_>) -> AttemptOutcome {
        let mode = RedirectMode::OutOfBand;
        let url = match ctx.flow.build_authorization_url(&mode, None) {
            Ok(url) => url,
            Err(e) => return settle(Err(e)),
        };

        ctx.prompter.present_url(&url);
        let code = match ctx.prompter.prompt_for_code("Enter the authorization code:") {
            Ok(code) => code,
            Err(e) => return settle(Err(e)),
        };

        settle(ctx.flow.exchange_code_for_credential(&code, &mode).await)
    }
}

/// Last resort: out-of-band code with input validation and a retry budget
pub struct ManualCodeStrategy {
    pub max_attempts: u32,
    pub min_code_length: usize,
}

impl ManualCodeStrategy {
    fn validate(&self, code: &str) -> std::result::Result<(), FlowError> {
        if code.is_empty() {
            return Err(FlowError::UserInputInvalid("no code entered".to_string()));
        }
        if code.chars().count() < self.min_code_length {
            return Err(FlowError::UserInputInvalid(format!(
                "code is too short (expected at least {} characters)",
                self.min_code_length
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl AuthStrategy for ManualCodeStrategy {
    fn kind(&self) -> MechanismKind {
        MechanismKind::ManualCode
    }

    fn describe(&self) -> String {
        format!("manual code entry ({} attempts)", self.max_attempts)
    }

    async fn attempt(&self, ctx: &AttemptContext<'_>) -> AttemptOutcome {
        let mode = RedirectMode::OutOfBand;
        let url = match ctx.flow.build_authorization_url(&mode, None) {
            Ok(url) => url,
            Err(e) => return settle(Err(e)),
        };

        ctx.prompter.present_url(&url);
        if !ctx.prompter.open_browser(&url) {
            tracing::debug!("Browser launch unavailable, relying on the printed URL");
        }

        let mut last_error = FlowError::UserInputInvalid("no attempts made".to_string());
        for attempt in 1..=self.max_attempts {
            let message = format!(
                "Paste the authorization code (attempt {}/{}):",
                attempt, self.max_attempts
            );
            let code = match ctx.prompter.prompt_for_code(&message) {
                Ok(code) => code.trim().to_string(),
                Err(FlowError::Interrupted) => {
                    return AttemptOutcome::Unrecoverable(FlowError::Interrupted)
                }
                Err(e) => {
                    last_error = e;
                    continue;
                }
            };

            if let Err(e) = self.validate(&code) {
                ctx.prompter.report(&format!("Invalid code: {}", e));
                last_error = e;
                continue;
            }

            match ctx.flow.exchange_code_for_credential(&code, &mode).await {
                Ok(credential) => return AttemptOutcome::Success(credential),
                Err(FlowError::Interrupted) => {
                    return AttemptOutcome::Unrecoverable(FlowError::Interrupted)
                }
                Err(e) => {
                    tracing::warn!("Manual code attempt {} rejected: {}", attempt, e);
                    ctx.prompter.report(&format!("Code rejected: {}", e));
                    last_error = e;
                }
            }
        }

        AttemptOutcome::Recoverable(last_error)
    }
}

/// Fixed cascade order: browser loopback across the candidate ports, console
/// code once, headless loopback once, manual code last.
pub fn default_strategies(config: &AuthConfig) -> Vec<Box<dyn AuthStrategy>> {
    let mut strategies: Vec<Box<dyn AuthStrategy>> = config
        .candidate_ports
        .iter()
        .map(|&port| {
            Box::new(LocalRedirectStrategy {
                port,
                open_browser: true,
            }) as Box<dyn AuthStrategy>
        })
        .collect();

    strategies.push(Box::new(ConsoleCodeStrategy));
    strategies.push(Box::new(LocalRedirectStrategy {
        port: config.headless_port,
        open_browser: false,
    }));
    strategies.push(Box::new(ManualCodeStrategy {
        max_attempts: config.manual_max_attempts,
        min_code_length: config.min_code_length,
    }));

    strategies
}

pub struct Orchestrator {
    flow: Arc<dyn AuthorizationFlow>,
    store: CredentialStore,
    prompter: Arc<dyn AuthPrompter>,
    config: AuthConfig,
    strategies: Vec<Box<dyn AuthStrategy>>,
}

impl Orchestrator {
    pub fn new(
        flow: Arc<dyn AuthorizationFlow>,
        store: CredentialStore,
        prompter: Arc<dyn AuthPrompter>,
        config: AuthConfig,
    ) -> Self {
        let strategies = default_strategies(&config);
        Self {
            flow,
            store,
            prompter,
            config,
            strategies,
        }
    }

    /// Replace the cascade with a custom ordered list
    pub fn with_strategies(mut self, strategies: Vec<Box<dyn AuthStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Produce a usable credential.
    ///
    /// A valid cached credential returns immediately with no network or
    /// interactive step. Only an exhausted cascade or a user interrupt fails.
    pub async fn run(&self) -> Result<AuthSession> {
        let mut states = vec![AuthState::CheckingCache];
        let mut attempts = Vec::new();

        let cached = self.load_cached().await;

        let acquired = match cached {
            Some(credential) if !credential.is_expired() => {
                tracing::info!("Using cached credential from {:?}", self.store.path());
                states.push(AuthState::Ready);
                return Ok(AuthSession {
                    credential,
                    source: CredentialSource::Cache,
                    attempts,
                    persisted: true,
                    states,
                });
            }
            Some(credential) if credential.is_refreshable() => {
                states.push(AuthState::Refreshing);
                match self.flow.refresh(&credential).await {
                    Ok(refreshed) => {
                        tracing::info!("Refreshed expired access token");
                        Ok((refreshed, CredentialSource::Refresh))
                    }
                    Err(e) => {
                        tracing::warn!("Token refresh failed ({}), re-authorizing", e);
                        self.cascade(&mut states, &mut attempts).await
                    }
                }
            }
            _ => self.cascade(&mut states, &mut attempts).await,
        };

        let (credential, source) = match acquired {
            Ok(found) => found,
            Err(e) => {
                states.push(AuthState::Failed);
                tracing::debug!("Orchestration states: {:?}", states);
                return Err(e);
            }
        };

        states.push(AuthState::Persisting);
        let persisted = match self.store.save(&credential).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("{}; continuing with an unsaved credential", e);
                self.prompter.report(&format!(
                    "Warning: could not save the credential ({}). You will be asked to authorize again next run.",
                    e
                ));
                false
            }
        };

        states.push(AuthState::Ready);
        Ok(AuthSession {
            credential,
            source,
            attempts,
            persisted,
            states,
        })
    }

    /// Cache lookup; a credential lacking required scopes or validity is a miss
    async fn load_cached(&self) -> Option<Credential> {
        let credential = self.store.load().await?;

        if !credential.covers_scopes(&self.config.scopes) {
            tracing::info!("Cached credential lacks required scopes, re-authorizing");
            return None;
        }
        if !CredentialStore::is_valid(&credential) {
            tracing::info!("Cached credential expired without a refresh token");
            return None;
        }

        Some(credential)
    }

    async fn cascade(
        &self,
        states: &mut Vec<AuthState>,
        attempts: &mut Vec<AttemptRecord>,
    ) -> Result<(Credential, CredentialSource)> {
        states.push(AuthState::Cascading);
        let ctx = AttemptContext {
            flow: self.flow.as_ref(),
            prompter: self.prompter.as_ref(),
        };

        let mut previous_failed_redirect = false;
        for strategy in &self.strategies {
            let kind = strategy.kind();
            let description = strategy.describe();

            if previous_failed_redirect && kind == MechanismKind::LocalRedirect {
                tokio::time::sleep(self.config.port_retry_delay()).await;
            }

            tracing::info!("Trying {}", description);
            self.prompter.report(&format!("Trying {}...", description));

            match strategy.attempt(&ctx).await {
                AttemptOutcome::Success(credential) => {
                    tracing::info!("Authorized via {}", description);
                    attempts.push(AttemptRecord {
                        mechanism: kind,
                        description,
                        error: None,
                    });
                    return Ok((credential, CredentialSource::Mechanism(kind)));
                }
                AttemptOutcome::Recoverable(e) => {
                    tracing::warn!("{} failed: {}", description, e);
                    previous_failed_redirect = kind == MechanismKind::LocalRedirect;
                    attempts.push(AttemptRecord {
                        mechanism: kind,
                        description,
                        error: Some(e),
                    });
                }
                AttemptOutcome::Unrecoverable(e) => {
                    tracing::warn!("Authorization aborted during {}: {}", description, e);
                    attempts.push(AttemptRecord {
                        mechanism: kind,
                        description,
                        error: Some(e.clone()),
                    });
                    return Err(TriageError::OperationCancelled(e.to_string()));
                }
            }
        }

        let summary = attempts
            .iter()
            .map(|a| match &a.error {
                Some(e) => format!("{}: {}", a.description, e),
                None => a.description.clone(),
            })
            .collect::<Vec<_>>()
            .join("; ");
        Err(TriageError::AllMechanismsExhausted(summary))
    }
}
