use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::AuthError;

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

// Refresh this long before the recorded expiry.
const EXPIRY_MARGIN_MS: i64 = 60_000;

#[derive(Clone)]
pub struct AuthHandle {
    access_token: String,
}

impl AuthHandle {
    pub fn new(access_token: impl Into<String>) -> Self {
        AuthHandle {
            access_token: access_token.into(),
        }
    }

    pub fn bearer(&self) -> &str {
        &self.access_token
    }
}

impl fmt::Debug for AuthHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthHandle").field("access_token", &"<redacted>").finish()
    }
}

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// A handle that is valid right now, or [`AuthError`] when no usable
    /// token is stored.
    async fn authorized_client(&self) -> Result<AuthHandle, AuthError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<i64>,
}

impl StoredToken {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expiry_date
            .is_some_and(|expiry| expiry - EXPIRY_MARGIN_MS <= now_ms)
    }
}

#[derive(Deserialize)]
struct CredentialsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

#[derive(Deserialize)]
struct ClientSecrets {
    client_id: String,
    client_secret: String,
    token_uri: Option<String>,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
    expires_in: Option<i64>,
    scope: Option<String>,
    token_type: Option<String>,
}

pub struct FileTokenProvider {
    client: reqwest::Client,
    token_path: PathBuf,
    credentials_path: PathBuf,
    cached: Mutex<Option<StoredToken>>,
}

impl FileTokenProvider {
    pub fn new(token_path: impl Into<PathBuf>, credentials_path: impl Into<PathBuf>) -> Self {
        FileTokenProvider {
            client: reqwest::Client::new(),
            token_path: token_path.into(),
            credentials_path: credentials_path.into(),
            cached: Mutex::new(None),
        }
    }

    fn read_token(&self) -> Result<StoredToken, AuthError> {
        if !self.token_path.exists() {
            return Err(AuthError::TokenMissing(self.token_path.clone()));
        }
        let content = fs::read_to_string(&self.token_path).map_err(|e| AuthError::TokenUnreadable {
            path: self.token_path.clone(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| AuthError::TokenUnreadable {
            path: self.token_path.clone(),
            reason: e.to_string(),
        })
    }

    fn read_secrets(&self) -> Result<ClientSecrets, AuthError> {
        let unreadable = |reason: String| AuthError::CredentialsUnreadable {
            path: self.credentials_path.clone(),
            reason,
        };
        let content =
            fs::read_to_string(&self.credentials_path).map_err(|e| unreadable(e.to_string()))?;
        let file: CredentialsFile =
            serde_json::from_str(&content).map_err(|e| unreadable(e.to_string()))?;
        file.installed
            .or(file.web)
            .ok_or_else(|| unreadable("no `installed` or `web` client section".to_string()))
    }

    async fn refresh(&self, token: &StoredToken) -> Result<StoredToken, AuthError> {
        let Some(refresh_token) = token.refresh_token.as_deref() else {
            return Err(AuthError::Refresh(
                "access token expired and no refresh token is stored".to_string(),
            ));
        };
        let secrets = self.read_secrets()?;
        let token_uri = secrets.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);

        let response = self
            .client
            .post(token_uri)
            .form(&[
                ("client_id", secrets.client_id.as_str()),
                ("client_secret", secrets.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Refresh(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Refresh(format!("{}: {}", status, body)));
        }
        let refreshed: RefreshResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Refresh(e.to_string()))?;

        Ok(StoredToken {
            access_token: refreshed.access_token,
            refresh_token: token.refresh_token.clone(),
            scope: refreshed.scope.or_else(|| token.scope.clone()),
            token_type: refreshed.token_type.or_else(|| token.token_type.clone()),
            expiry_date: refreshed
                .expires_in
                .map(|secs| Utc::now().timestamp_millis() + secs * 1000),
        })
    }

    fn write_token(path: &Path, token: &StoredToken) {
        let result = serde_json::to_string(token)
            .map_err(|e| e.to_string())
            .and_then(|json| fs::write(path, json).map_err(|e| e.to_string()));
        if let Err(e) = result {
            warn!("Could not store refreshed token at {:?}: {}", path, e);
        }
    }
}

#[async_trait]
impl TokenProvider for FileTokenProvider {
    async fn authorized_client(&self) -> Result<AuthHandle, AuthError> {
        let mut cached = self.cached.lock().await;
        let token = match cached.take() {
            Some(token) => token,
            None => self.read_token()?,
        };

        let token = if token.is_expired(Utc::now().timestamp_millis()) {
            let refreshed = self.refresh(&token).await?;
            info!("Refreshed access token");
            Self::write_token(&self.token_path, &refreshed);
            refreshed
        } else {
            token
        };

        let handle = AuthHandle::new(token.access_token.clone());
        *cached = Some(token);
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider_in(dir: &Path) -> FileTokenProvider {
        FileTokenProvider::new(dir.join("token.json"), dir.join("credentials.json"))
    }

    #[tokio::test]
    async fn test_missing_token_is_auth_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = provider_in(dir.path()).authorized_client().await.unwrap_err();
        assert!(matches!(err, AuthError::TokenMissing(_)));
    }

    #[tokio::test]
    async fn test_valid_token_is_used_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let expiry = Utc::now().timestamp_millis() + 3_600_000;
        fs::write(
            dir.path().join("token.json"),
            format!(
                r#"{{"access_token":"ya29.abc","refresh_token":"1//r","expiry_date":{expiry}}}"#
            ),
        )
        .unwrap();

        let handle = provider_in(dir.path()).authorized_client().await.unwrap();
        assert_eq!(handle.bearer(), "ya29.abc");
    }

    #[tokio::test]
    async fn test_expired_token_without_refresh_token() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("token.json"),
            r#"{"access_token":"ya29.old","expiry_date":1000}"#,
        )
        .unwrap();

        let err = provider_in(dir.path()).authorized_client().await.unwrap_err();
        assert!(matches!(err, AuthError::Refresh(_)));
    }

    #[tokio::test]
    async fn test_garbled_token_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("token.json"), "not json").unwrap();
        let err = provider_in(dir.path()).authorized_client().await.unwrap_err();
        assert!(matches!(err, AuthError::TokenUnreadable { .. }));
    }

    #[test]
    fn test_expiry_margin() {
        let token = StoredToken {
            access_token: "t".to_string(),
            refresh_token: None,
            scope: None,
            token_type: None,
            expiry_date: Some(100_000),
        };
        assert!(!token.is_expired(10_000));
        assert!(token.is_expired(50_000));

        let no_expiry = StoredToken { expiry_date: None, ..token };
        assert!(!no_expiry.is_expired(i64::MAX));
    }

    #[test]
    fn test_handle_debug_redacts() {
        let handle = AuthHandle::new("secret-token");
        assert!(!format!("{:?}", handle).contains("secret-token"));
    }
}
