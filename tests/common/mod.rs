//! Common test utilities and fixtures
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use inbox_triage::assistant::CompletionBackend;
use inbox_triage::auth::DEFAULT_SCOPES;
use inbox_triage::client::MailClient;
use inbox_triage::config::AuthConfig;
use inbox_triage::credential::{Credential, CredentialStore};
use inbox_triage::error::{FlowError, Result};
use inbox_triage::models::{MailboxProfile, RawMessage, ThreadMessage};
use inbox_triage::oauth_flow::{AuthorizationFlow, RedirectMode};
use inbox_triage::orchestrator::Orchestrator;
use inbox_triage::prompt::AuthPrompter;
use mockall::mock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub type FlowResult<T> = std::result::Result<T, FlowError>;

/// One recorded call against the scripted flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowCall {
    Bind { port: u16, browser: bool },
    Exchange { code: String, out_of_band: bool },
    Refresh,
}

/// Authorization flow whose outcomes are scripted per port and per call.
///
/// Unscripted loopback ports report `PortUnavailable`; an empty exchange queue
/// answers `InvalidGrant`; an unscripted refresh answers `RefreshRevoked`.
#[derive(Default)]
pub struct ScriptedFlow {
    loopback: Mutex<HashMap<(u16, bool), FlowResult<Credential>>>,
    exchanges: Mutex<Vec<FlowResult<Credential>>>,
    refresh: Mutex<Option<FlowResult<Credential>>>,
    calls: Mutex<Vec<FlowCall>>,
}

impl ScriptedFlow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outcome of a browser-opening loopback capture on `port`
    pub fn on_port(self, port: u16, outcome: FlowResult<Credential>) -> Self {
        self.loopback.lock().unwrap().insert((port, true), outcome);
        self
    }

    /// Outcome of the headless loopback capture on `port`
    pub fn on_headless_port(self, port: u16, outcome: FlowResult<Credential>) -> Self {
        self.loopback.lock().unwrap().insert((port, false), outcome);
        self
    }

    pub fn then_exchange(self, outcome: FlowResult<Credential>) -> Self {
        self.exchanges.lock().unwrap().push(outcome);
        self
    }

    pub fn on_refresh(self, outcome: FlowResult<Credential>) -> Self {
        *self.refresh.lock().unwrap() = Some(outcome);
        self
    }

    pub fn calls(&self) -> Vec<FlowCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Ports bound so far, in order, with the browser flag
    pub fn binds(&self) -> Vec<(u16, bool)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                FlowCall::Bind { port, browser } => Some((port, browser)),
                _ => None,
            })
            .collect()
    }

    pub fn exchange_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, FlowCall::Exchange { .. }))
            .count()
    }
}

#[async_trait]
impl AuthorizationFlow for ScriptedFlow {
    fn build_authorization_url(
        &self,
        mode: &RedirectMode,
        state: Option<&str>,
    ) -> FlowResult<String> {
        Ok(format!(
            "https://consent.test/auth?redirect_uri={}&state={}",
            mode.redirect_uri(),
            state.unwrap_or("")
        ))
    }

    async fn exchange_code_for_credential(
        &self,
        code: &str,
        mode: &RedirectMode,
    ) -> FlowResult<Credential> {
        self.calls.lock().unwrap().push(FlowCall::Exchange {
            code: code.to_string(),
            out_of_band: matches!(mode, RedirectMode::OutOfBand),
        });
        let mut queue = self.exchanges.lock().unwrap();
        if queue.is_empty() {
            Err(FlowError::InvalidGrant("unscripted exchange".to_string()))
        } else {
            queue.remove(0)
        }
    }

    async fn capture_via_local_redirect(
        &self,
        port: u16,
        auto_open_browser: bool,
        _prompter: &dyn AuthPrompter,
    ) -> FlowResult<Credential> {
        self.calls.lock().unwrap().push(FlowCall::Bind {
            port,
            browser: auto_open_browser,
        });
        self.loopback
            .lock()
            .unwrap()
            .get(&(port, auto_open_browser))
            .cloned()
            .unwrap_or(Err(FlowError::PortUnavailable {
                port,
                reason: "address already in use".to_string(),
            }))
    }

    async fn refresh(&self, _credential: &Credential) -> FlowResult<Credential> {
        self.calls.lock().unwrap().push(FlowCall::Refresh);
        self.refresh
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(Err(FlowError::RefreshRevoked("unscripted refresh".to_string())))
    }
}

/// Prompter that replays scripted answers and records everything shown
#[derive(Default)]
pub struct ScriptedPrompter {
    answers: Mutex<Vec<FlowResult<String>>>,
    pub prompts: Mutex<Vec<String>>,
    pub urls: Mutex<Vec<String>>,
    pub reports: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answering<I>(answers: I) -> Self
    where
        I: IntoIterator<Item = FlowResult<String>>,
    {
        let prompter = Self::default();
        *prompter.answers.lock().unwrap() = answers.into_iter().collect();
        prompter
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn reports(&self) -> Vec<String> {
        self.reports.lock().unwrap().clone()
    }

    /// Whether the user was asked anything or shown a consent URL
    pub fn was_interactive(&self) -> bool {
        self.prompt_count() > 0 || !self.urls.lock().unwrap().is_empty()
    }
}

impl AuthPrompter for ScriptedPrompter {
    fn present_url(&self, url: &str) {
        self.urls.lock().unwrap().push(url.to_string());
    }

    fn open_browser(&self, _url: &str) -> bool {
        false
    }

    fn prompt_for_code(&self, message: &str) -> FlowResult<String> {
        self.prompts.lock().unwrap().push(message.to_string());
        let mut answers = self.answers.lock().unwrap();
        if answers.is_empty() {
            Ok(String::new())
        } else {
            answers.remove(0)
        }
    }

    fn report(&self, message: &str) {
        self.reports.lock().unwrap().push(message.to_string());
    }
}

/// Cascade settings with the default port order and no inter-port delay
pub fn auth_config() -> AuthConfig {
    AuthConfig {
        port_retry_delay_ms: 0,
        ..AuthConfig::default()
    }
}

/// Credential granted the default scopes, valid for an hour
pub fn fresh_credential(tag: &str) -> Credential {
    Credential::new(format!("access-{}", tag))
        .with_refresh_token(format!("refresh-{}", tag))
        .with_expires_at(Utc::now() + Duration::hours(1))
        .with_scopes(DEFAULT_SCOPES.iter().copied())
}

/// Expired credential that can still be refreshed
pub fn expired_credential(tag: &str) -> Credential {
    fresh_credential(tag).with_expires_at(Utc::now() - Duration::hours(1))
}

pub fn store_in(dir: &Path) -> CredentialStore {
    CredentialStore::new(dir.join("token.json"))
}

pub fn orchestrator(
    flow: Arc<ScriptedFlow>,
    prompter: Arc<ScriptedPrompter>,
    store: CredentialStore,
) -> Orchestrator {
    Orchestrator::new(flow, store, prompter, auth_config())
}

pub fn reference_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 10, 9, 0, 0).unwrap()
}

pub fn profile(address: &str) -> MailboxProfile {
    MailboxProfile {
        email_address: address.to_string(),
        messages_total: 1200,
        threads_total: 800,
    }
}

pub fn raw_message(id: &str, sender: &str, subject: &str) -> RawMessage {
    RawMessage {
        id: id.to_string(),
        thread_id: format!("thread_{}", id),
        sender: sender.to_string(),
        subject: subject.to_string(),
        date_header: "Mon, 10 Jun 2024 09:00:00 +0000".to_string(),
        body: format!("Hello, this is the body of {}.", subject),
        received_at: reference_time(),
    }
}

pub fn thread_entry(sender: &str, offset_minutes: i64) -> ThreadMessage {
    ThreadMessage {
        sender: sender.to_string(),
        timestamp: Some(reference_time() + Duration::minutes(offset_minutes)),
    }
}

mock! {
    pub MailClient {}

    #[async_trait::async_trait]
    impl MailClient for MailClient {
        async fn get_profile(&self) -> Result<MailboxProfile>;
        async fn list_recent_message_ids(&self, max: u32, days_back: u32) -> Result<Vec<String>>;
        async fn get_message(&self, id: &str) -> Result<RawMessage>;
        async fn get_thread(&self, thread_id: &str) -> Result<Vec<ThreadMessage>>;
    }
}

mock! {
    pub Backend {}

    #[async_trait::async_trait]
    impl CompletionBackend for Backend {
        async fn complete(&self, prompt: &str, max_tokens: u16, temperature: f32) -> Result<String>;
    }
}
