//! Persisted OAuth2 credential and its on-disk store

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, TriageError};

/// Seconds before the recorded expiry at which an access token is treated as expired
const EXPIRY_SKEW_SECS: i64 = 60;

/// Access/refresh token pair with expiry and granted scopes.
///
/// Values are replaced wholesale on refresh; nothing mutates a stored credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            scopes: Vec::new(),
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// True once the access token is within the skew window of its expiry.
    /// A credential without a recorded expiry never expires.
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|exp| Utc::now() + Duration::seconds(EXPIRY_SKEW_SECS) >= exp)
    }

    pub fn is_refreshable(&self) -> bool {
        self.refresh_token
            .as_deref()
            .is_some_and(|token| !token.is_empty())
    }

    /// Whether every requested scope was granted. An empty grant list is
    /// treated as unknown and accepted.
    pub fn covers_scopes(&self, required: &[String]) -> bool {
        self.scopes.is_empty() || required.iter().all(|scope| self.scopes.contains(scope))
    }
}

/// Local JSON file holding the single cached credential
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the cached credential. Missing and corrupt files both yield `None`.
    pub async fn load(&self) -> Option<Credential> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No cached credential at {:?}", self.path);
                return None;
            }
            Err(e) => {
                tracing::warn!("Could not read credential store {:?}: {}", self.path, e);
                return None;
            }
        };

        match serde_json::from_slice::<Credential>(&bytes) {
            Ok(credential) if !credential.access_token.is_empty() => Some(credential),
            Ok(_) => {
                tracing::warn!("Cached credential at {:?} has no access token, ignoring", self.path);
                None
            }
            Err(e) => {
                tracing::warn!(
                    "Cached credential at {:?} is corrupt ({}), re-authorization required",
                    self.path,
                    e
                );
                None
            }
        }
    }

    /// Write the credential to a sibling temp file, then rename it over the store
    pub async fn save(&self, credential: &Credential) -> Result<()> {
        let json = serde_json::to_vec_pretty(credential)?;
        self.write_atomically(&json)
            .await
            .map_err(|e| TriageError::PersistenceWriteFailed(format!("{:?}: {}", self.path, e)))?;
        tracing::debug!("Saved credential to {:?}", self.path);
        Ok(())
    }

    async fn write_atomically(&self, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp_path = self.temp_path();
        let result: std::io::Result<()> = async {
            tokio::fs::write(&tmp_path, bytes).await?;
            secure_token_file(&tmp_path).await?;
            tokio::fs::File::open(&tmp_path).await?.sync_all().await?;
            tokio::fs::rename(&tmp_path, &self.path).await
        }
        .await;

        if result.is_err() {
            let _ = tokio::fs::remove_file(&tmp_path).await;
        }
        result
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "token.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Delete the cached credential, if any
    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::info!("Removed cached credential at {:?}", self.path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Not expired, or expired but carrying a refresh token
    pub fn is_valid(credential: &Credential) -> bool {
        !credential.is_expired() || credential.is_refreshable()
    }
}

/// Restrict the token file to its owner (0600)
#[cfg(unix)]
async fn secure_token_file(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = tokio::fs::metadata(path).await?.permissions();
    perms.set_mode(0o600);
    tokio::fs::set_permissions(path, perms).await
}

#[cfg(not(unix))]
async fn secure_token_file(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Credential {
        Credential::new("ya29.access")
            .with_refresh_token("1//refresh")
            .with_expires_at(Utc::now() + Duration::hours(1))
            .with_scopes(["https://www.googleapis.com/auth/gmail.readonly"])
    }

    #[test]
    fn test_expiry_and_validity() {
        let fresh = sample();
        assert!(!fresh.is_expired());
        assert!(CredentialStore::is_valid(&fresh));

        let expired_refreshable = sample().with_expires_at(Utc::now() - Duration::minutes(5));
        assert!(expired_refreshable.is_expired());
        assert!(CredentialStore::is_valid(&expired_refreshable));

        let mut expired_bare = expired_refreshable.clone();
        expired_bare.refresh_token = None;
        assert!(!CredentialStore::is_valid(&expired_bare));

        let within_skew = sample().with_expires_at(Utc::now() + Duration::seconds(30));
        assert!(within_skew.is_expired());

        assert!(!Credential::new("no-expiry").is_expired());
    }

    #[test]
    fn test_empty_refresh_token_is_not_refreshable() {
        let credential = Credential::new("a").with_refresh_token("");
        assert!(!credential.is_refreshable());
    }

    #[test]
    fn test_covers_scopes() {
        let credential = sample();
        assert!(credential.covers_scopes(&[
            "https://www.googleapis.com/auth/gmail.readonly".to_string()
        ]));
        assert!(!credential.covers_scopes(&[
            "https://www.googleapis.com/auth/gmail.readonly".to_string(),
            "https://www.googleapis.com/auth/gmail.send".to_string(),
        ]));
        assert!(Credential::new("a").covers_scopes(&["anything".to_string()]));
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("nested").join("token.json"));

        let credential = sample();
        store.save(&credential).await.unwrap();

        assert_eq!(store.load().await, Some(credential));
        assert!(!dir.path().join("nested").join("token.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_save_overwrites_previous() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("token.json"));

        store.save(&sample()).await.unwrap();
        let replacement = Credential::new("second");
        store.save(&replacement).await.unwrap();

        assert_eq!(store.load().await, Some(replacement));
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("token.json"));
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn test_load_corrupt_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        tokio::fs::write(&path, b"{\"access_token\": \"trunc").await.unwrap();

        let store = CredentialStore::new(&path);
        assert!(store.load().await.is_none());

        tokio::fs::write(&path, b"{\"access_token\": \"\"}").await.unwrap();
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn test_save_into_unwritable_location_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        tokio::fs::write(&blocker, b"file, not a directory").await.unwrap();

        let store = CredentialStore::new(blocker.join("token.json"));
        let err = store.save(&sample()).await.unwrap_err();
        assert!(matches!(err, TriageError::PersistenceWriteFailed(_)));
    }

    #[tokio::test]
    async fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("token.json"));

        store.clear().await.unwrap();
        store.save(&sample()).await.unwrap();
        store.clear().await.unwrap();
        assert!(store.load().await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("token.json"));
        store.save(&sample()).await.unwrap();

        let perms = tokio::fs::metadata(store.path()).await.unwrap().permissions();
        assert_eq!(perms.mode() & 0o777, 0o600);
    }
}
