use thiserror::Error;

/// Type alias for Result with TriageError
pub type Result<T> = std::result::Result<T, TriageError>;

/// Error types for the triage pipeline
#[derive(Error, Debug)]
pub enum TriageError {
    /// Gmail API returned an error
    #[error("Gmail API error: {0}")]
    ApiError(String),

    /// Authentication failed outside the fallback cascade (e.g. unreadable secret)
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Every authorization mechanism in the cascade failed
    #[error("All authorization mechanisms exhausted: {0}")]
    AllMechanismsExhausted(String),

    /// User cancelled operation
    #[error("Operation cancelled: {0}")]
    OperationCancelled(String),

    /// Credential could not be written to the store
    #[error("Failed to persist credential: {0}")]
    PersistenceWriteFailed(String),

    /// Rate limit exceeded - should retry after specified seconds
    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    /// Network-related error (connection issues, timeouts, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Server returned 5xx error
    #[error("Server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// Resource not found (404)
    #[error("Not found: {0}")]
    MessageNotFound(String),

    /// Bad request (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Forbidden (403)
    #[error("Access forbidden: {0}")]
    Forbidden(String),

    /// Invalid message format or parsing error
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    /// Language-model completion failed
    #[error("Language model error: {0}")]
    CompletionError(String),

    /// Report export failed
    #[error("Export error: {0}")]
    ExportError(String),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl TriageError {
    /// Check if the error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TriageError::RateLimitExceeded { .. }
                | TriageError::ServerError { .. }
                | TriageError::NetworkError(_)
        )
    }

    /// Only an exhausted cascade, a cancelled run, or broken configuration stops a run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TriageError::AllMechanismsExhausted(_)
                | TriageError::OperationCancelled(_)
                | TriageError::ConfigError(_)
                | TriageError::AuthError(_)
        )
    }
}

/// Closed set of failure kinds produced by the authorization flow.
///
/// The cascade decides what to do next from the variant alone; provider
/// failures are classified from the token endpoint's `error` field.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    #[error("port {port} unavailable: {reason}")]
    PortUnavailable { port: u16, reason: String },

    #[error("provider rejected redirect target {redirect_uri}")]
    RedirectMismatch { redirect_uri: String },

    #[error("no redirect received within {secs} seconds")]
    Timeout { secs: u64 },

    #[error("authorization code rejected: {0}")]
    InvalidGrant(String),

    #[error("refresh token rejected: {0}")]
    RefreshRevoked(String),

    #[error("token exchange failed: {0}")]
    ProviderExchange(String),

    #[error("invalid input: {0}")]
    UserInputInvalid(String),

    #[error("user denied access")]
    AccessDenied,

    #[error("redirect state did not match the request")]
    StateMismatch,

    #[error("interrupted by user")]
    Interrupted,
}

impl FlowError {
    /// Whether the cascade may continue with the next mechanism
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, FlowError::Interrupted)
    }
}

/// Parse the Retry-After header from an HTTP response
///
/// Only the delay-seconds form is honoured; anything else falls back to 5 seconds.
fn parse_retry_after_header<B>(response: &hyper::Response<B>) -> u64 {
    const DEFAULT_RETRY_AFTER: u64 = 5;

    response
        .headers()
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

impl From<google_gmail1::Error> for TriageError {
    fn from(error: google_gmail1::Error) -> Self {
        match error {
            google_gmail1::Error::Failure(ref response) => {
                let status = response.status();
                let status_code = status.as_u16();
                let message = format!(
                    "HTTP {}: {}",
                    status_code,
                    status.canonical_reason().unwrap_or("Unknown")
                );

                match status_code {
                    429 => {
                        let retry_after = parse_retry_after_header(response);
                        TriageError::RateLimitExceeded { retry_after }
                    }
                    404 => TriageError::MessageNotFound("Resource not found".to_string()),
                    400 => TriageError::BadRequest(message),
                    403 => TriageError::Forbidden(message),
                    500..=599 => TriageError::ServerError {
                        status: status_code,
                        message,
                    },
                    _ => TriageError::ApiError(message),
                }
            }
            google_gmail1::Error::BadRequest(ref err) => TriageError::BadRequest(format!("{}", err)),
            google_gmail1::Error::HttpError(ref err) => {
                TriageError::NetworkError(format!("Connection error: {}", err))
            }
            google_gmail1::Error::Io(err) => TriageError::NetworkError(err.to_string()),
            _ => TriageError::ApiError(error.to_string()),
        }
    }
}
