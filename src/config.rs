use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TriageError};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

/// Authorization cascade settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Loopback ports tried in order with browser auto-open; 0 asks the OS for a port
    #[serde(default = "default_candidate_ports")]
    pub candidate_ports: Vec<u16>,
    /// Port for the headless (no browser) loopback attempt
    #[serde(default = "default_headless_port")]
    pub headless_port: u16,
    #[serde(default = "default_redirect_timeout_secs")]
    pub redirect_timeout_secs: u64,
    #[serde(default = "default_port_retry_delay_ms")]
    pub port_retry_delay_ms: u64,
    #[serde(default = "default_manual_max_attempts")]
    pub manual_max_attempts: u32,
    #[serde(default = "default_min_code_length")]
    pub min_code_length: usize,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            candidate_ports: default_candidate_ports(),
            headless_port: default_headless_port(),
            redirect_timeout_secs: default_redirect_timeout_secs(),
            port_retry_delay_ms: default_port_retry_delay_ms(),
            manual_max_attempts: default_manual_max_attempts(),
            min_code_length: default_min_code_length(),
            scopes: default_scopes(),
        }
    }
}

impl AuthConfig {
    pub fn redirect_timeout(&self) -> Duration {
        Duration::from_secs(self.redirect_timeout_secs)
    }

    pub fn port_retry_delay(&self) -> Duration {
        Duration::from_millis(self.port_retry_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default = "default_max_emails")]
    pub max_emails: u32,
    #[serde(default = "default_max_email_limit")]
    pub max_email_limit: u32,
    #[serde(default = "default_days_back")]
    pub days_back: u32,
    #[serde(default = "default_body_char_limit")]
    pub body_char_limit: usize,
    #[serde(default = "default_true")]
    pub check_replies: bool,
    #[serde(default = "default_true")]
    pub generate_drafts: bool,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            max_emails: default_max_emails(),
            max_email_limit: default_max_email_limit(),
            days_back: default_days_back(),
            body_char_limit: default_body_char_limit(),
            check_replies: true,
            generate_drafts: true,
        }
    }
}

impl MailConfig {
    /// Requested batch size clamped to the configured ceiling
    pub fn effective_max_emails(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.max_emails)
            .clamp(1, self.max_email_limit)
    }
}

/// Language-model settings (any OpenAI-compatible chat completions endpoint)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: u16,
    #[serde(default = "default_draft_max_tokens")]
    pub draft_max_tokens: u16,
    #[serde(default = "default_summary_temperature")]
    pub summary_temperature: f32,
    #[serde(default = "default_draft_temperature")]
    pub draft_temperature: f32,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            summary_max_tokens: default_summary_max_tokens(),
            draft_max_tokens: default_draft_max_tokens(),
            summary_temperature: default_summary_temperature(),
            draft_temperature: default_draft_temperature(),
        }
    }
}

impl AiConfig {
    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Result<String> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(TriageError::ConfigError(format!(
                "{} not set; the language-model API key is required",
                self.api_key_env
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

fn default_candidate_ports() -> Vec<u16> {
    vec![8080, 8090, 9090, 8000, 8888, 0]
}

fn default_headless_port() -> u16 {
    8080
}

fn default_redirect_timeout_secs() -> u64 {
    120
}

fn default_port_retry_delay_ms() -> u64 {
    250
}

fn default_manual_max_attempts() -> u32 {
    3
}

fn default_min_code_length() -> usize {
    20
}

fn default_scopes() -> Vec<String> {
    crate::auth::DEFAULT_SCOPES
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_emails() -> u32 {
    50
}

fn default_max_email_limit() -> u32 {
    200
}

fn default_days_back() -> u32 {
    7
}

fn default_body_char_limit() -> usize {
    2000
}

fn default_true() -> bool {
    true
}

fn default_api_base() -> String {
    "https://api.groq.com/openai/v1".to_string()
}

fn default_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}

fn default_api_key_env() -> String {
    "GROQ_API_KEY".to_string()
}

fn default_summary_max_tokens() -> u16 {
    150
}

fn default_draft_max_tokens() -> u16 {
    300
}

fn default_summary_temperature() -> f32 {
    0.3
}

fn default_draft_temperature() -> f32 {
    0.5
}

fn default_output_dir() -> String {
    "output".to_string()
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| TriageError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| TriageError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                TriageError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| TriageError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| TriageError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let auth = &self.auth;

        if auth.candidate_ports.is_empty() {
            return Err(TriageError::ConfigError(
                "auth.candidate_ports must list at least one port".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for port in &auth.candidate_ports {
            if !seen.insert(*port) {
                return Err(TriageError::ConfigError(format!(
                    "auth.candidate_ports contains port {} more than once",
                    port
                )));
            }
        }
        if auth.redirect_timeout_secs == 0 {
            return Err(TriageError::ConfigError(
                "auth.redirect_timeout_secs must be at least 1".to_string(),
            ));
        }
        if auth.redirect_timeout_secs > 3600 {
            return Err(TriageError::ConfigError(
                "auth.redirect_timeout_secs cannot exceed 3600".to_string(),
            ));
        }
        if auth.manual_max_attempts == 0 {
            return Err(TriageError::ConfigError(
                "auth.manual_max_attempts must be greater than 0".to_string(),
            ));
        }
        if auth.scopes.is_empty() {
            return Err(TriageError::ConfigError(
                "auth.scopes cannot be empty".to_string(),
            ));
        }

        let mail = &self.mail;
        if mail.max_email_limit == 0 {
            return Err(TriageError::ConfigError(
                "mail.max_email_limit must be at least 1".to_string(),
            ));
        }
        if mail.max_emails == 0 || mail.max_emails > mail.max_email_limit {
            return Err(TriageError::ConfigError(format!(
                "mail.max_emails must be between 1 and {}",
                mail.max_email_limit
            )));
        }
        if mail.body_char_limit == 0 {
            return Err(TriageError::ConfigError(
                "mail.body_char_limit must be greater than 0".to_string(),
            ));
        }

        let ai = &self.ai;
        if ai.model.trim().is_empty() {
            return Err(TriageError::ConfigError("ai.model cannot be empty".to_string()));
        }
        if ai.api_key_env.trim().is_empty() {
            return Err(TriageError::ConfigError(
                "ai.api_key_env cannot be empty".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&ai.summary_temperature)
            || !(0.0..=2.0).contains(&ai.draft_temperature)
        {
            return Err(TriageError::ConfigError(
                "ai temperatures must be between 0.0 and 2.0".to_string(),
            ));
        }
        if ai.summary_max_tokens == 0 || ai.draft_max_tokens == 0 {
            return Err(TriageError::ConfigError(
                "ai max token limits must be greater than 0".to_string(),
            ));
        }

        if self.export.output_dir.trim().is_empty() {
            return Err(TriageError::ConfigError(
                "export.output_dir cannot be empty".to_string(),
            ));
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        let config = Self::default();
        config.save(path).await
    }
}
