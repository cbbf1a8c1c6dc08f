//! OAuth2 client-secret loading and Gmail API hub construction

use google_gmail1::{hyper_rustls, hyper_util, yup_oauth2, Gmail};
use std::env;
use std::path::Path;
use yup_oauth2::ApplicationSecret;

use crate::credential::Credential;
use crate::error::{Result, TriageError};

/// Default scopes: read the inbox, and send replies built from drafts
pub const DEFAULT_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/gmail.send",
];

/// Read-only scope for safe operations
pub const READONLY_SCOPES: &[&str] = &["https://www.googleapis.com/auth/gmail.readonly"];

pub const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Type alias for Gmail Hub to simplify type signatures
pub type GmailHub = Gmail<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>>;

/// Load the installed-application secret.
///
/// The credentials file wins when it exists; otherwise `GMAIL_CLIENT_ID` and
/// `GMAIL_CLIENT_SECRET` are used. Having neither is a fatal configuration error.
pub async fn load_client_secret(credentials_path: &Path) -> Result<ApplicationSecret> {
    if credentials_path.exists() {
        let secret = yup_oauth2::read_application_secret(credentials_path)
            .await
            .map_err(|e| {
                TriageError::ConfigError(format!(
                    "Failed to read client secret from {:?}: {}",
                    credentials_path, e
                ))
            })?;
        tracing::debug!("Loaded client secret from {:?}", credentials_path);
        return Ok(secret);
    }

    load_client_secret_from_env().map_err(|_| {
        TriageError::ConfigError(format!(
            "{:?} not found and GMAIL_CLIENT_ID/GMAIL_CLIENT_SECRET are not set. \
             Download OAuth2 desktop-app credentials from Google Cloud Console.",
            credentials_path
        ))
    })
}

/// Load OAuth2 client secret from environment variables
///
/// # Environment Variables
/// - `GMAIL_CLIENT_ID`: OAuth2 client ID
/// - `GMAIL_CLIENT_SECRET`: OAuth2 client secret
pub fn load_client_secret_from_env() -> Result<ApplicationSecret> {
    let client_id = env::var("GMAIL_CLIENT_ID")
        .map_err(|_| TriageError::ConfigError("GMAIL_CLIENT_ID not set".to_string()))?;
    let client_secret = env::var("GMAIL_CLIENT_SECRET")
        .map_err(|_| TriageError::ConfigError("GMAIL_CLIENT_SECRET not set".to_string()))?;

    Ok(ApplicationSecret {
        client_id,
        client_secret,
        auth_uri: GOOGLE_AUTH_URI.to_string(),
        token_uri: GOOGLE_TOKEN_URI.to_string(),
        redirect_uris: vec!["http://localhost".to_string()],
        ..Default::default()
    })
}

/// Build a Gmail hub that authorizes every call with the given credential's access token.
///
/// The hub borrows the token for the session only; refreshing and persisting
/// stay with the orchestrator and the credential store.
pub fn build_gmail_hub(credential: &Credential) -> Result<GmailHub> {
    // HTTP/1 works better with google-gmail1 than the HTTP/2 default
    let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
        .build(
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_native_roots()
                .map_err(|e| TriageError::AuthError(format!("Failed to load TLS roots: {}", e)))?
                .https_or_http()
                .enable_http1()
                .build(),
        );

    Ok(Gmail::new(client, credential.access_token.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_load_client_secret_from_file() {
        let credentials_json = r#"{
            "installed": {
                "client_id": "test-client-id",
                "project_id": "test-project",
                "auth_uri": "https://accounts.google.com/o/oauth2/auth",
                "token_uri": "https://oauth2.googleapis.com/token",
                "client_secret": "test-secret",
                "redirect_uris": ["http://localhost"]
            }
        }"#;

        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), credentials_json)
            .await
            .unwrap();

        let secret = load_client_secret(temp_file.path()).await.unwrap();
        assert_eq!(secret.client_id, "test-client-id");
        assert_eq!(secret.client_secret, "test-secret");
        assert_eq!(secret.token_uri, GOOGLE_TOKEN_URI);
    }

    #[tokio::test]
    async fn test_load_client_secret_malformed_file() {
        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), "{ not json").await.unwrap();

        let err = load_client_secret(temp_file.path()).await.unwrap_err();
        assert!(matches!(err, TriageError::ConfigError(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    #[serial]
    async fn test_load_client_secret_falls_back_to_env() {
        env::set_var("GMAIL_CLIENT_ID", "env-id");
        env::set_var("GMAIL_CLIENT_SECRET", "env-secret");

        let dir = tempfile::tempdir().unwrap();
        let secret = load_client_secret(&dir.path().join("credentials.json"))
            .await
            .unwrap();
        assert_eq!(secret.client_id, "env-id");
        assert_eq!(secret.auth_uri, GOOGLE_AUTH_URI);

        env::remove_var("GMAIL_CLIENT_ID");
        env::remove_var("GMAIL_CLIENT_SECRET");
    }

    #[tokio::test]
    #[serial]
    async fn test_missing_secret_material_is_fatal() {
        env::remove_var("GMAIL_CLIENT_ID");
        env::remove_var("GMAIL_CLIENT_SECRET");

        let dir = tempfile::tempdir().unwrap();
        let err = load_client_secret(&dir.path().join("credentials.json"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("GMAIL_CLIENT_ID"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_scopes_constants() {
        assert_eq!(DEFAULT_SCOPES.len(), 2);
        assert!(DEFAULT_SCOPES.contains(&"https://www.googleapis.com/auth/gmail.readonly"));
        assert!(DEFAULT_SCOPES.contains(&"https://www.googleapis.com/auth/gmail.send"));
        assert_eq!(READONLY_SCOPES.len(), 1);
    }
}
