//! Where credentials live on disk, and what they look like there.

use crate::youtube_api::TimeBoundAccessToken;
use eyre::Context;
use jiff::Timestamp;
use oauth2::basic::{BasicTokenResponse, BasicTokenType};
use oauth2::{AccessToken, EmptyExtraTokenFields, RefreshToken, Scope, TokenResponse};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const DEFAULT_CREDENTIALS: &str = "~/.youtube-upload-credentials.json";
const FALLBACK_CLIENT_SECRETS: &str = "~/.client_secrets.json";

/// Install locations checked for a packaged client secrets file, in order.
const INSTALLED_CLIENT_SECRETS: &[&str] = &[
    "/usr/share/youtube_upload/client_secrets.json",
    "/usr/local/share/youtube_upload/client_secrets.json",
];

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

/// The client secrets file to use: the explicit one, else a packaged one, else the dotfile.
pub fn client_secrets_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    INSTALLED_CLIENT_SECRETS
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
        .unwrap_or_else(|| expand(FALLBACK_CLIENT_SECRETS))
}

/// The credentials store: the explicit one, else the dotfile in the user's home directory.
pub fn credentials_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| expand(DEFAULT_CREDENTIALS))
}

/// An OAuth token as persisted between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// When the access token must be refreshed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_expiry: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
}

impl StoredCredentials {
    pub fn from_token(token: &TimeBoundAccessToken) -> Self {
        let raw = token.raw_token();
        Self {
            access_token: raw.access_token().secret().clone(),
            refresh_token: raw.refresh_token().map(|t| t.secret().clone()),
            token_expiry: Timestamp::try_from(token.expires_at()).ok(),
            scopes: raw
                .scopes()
                .map(|s| s.iter().map(|s| s.as_str().to_owned()).collect())
                .unwrap_or_default(),
        }
    }

    /// Rebuilds the in-memory token. A missing expiry is treated as already expired.
    pub fn into_token(self) -> TimeBoundAccessToken {
        let mut token = BasicTokenResponse::new(
            AccessToken::new(self.access_token),
            BasicTokenType::Bearer,
            EmptyExtraTokenFields {},
        );
        token.set_refresh_token(self.refresh_token.map(RefreshToken::new));
        if !self.scopes.is_empty() {
            token.set_scopes(Some(self.scopes.into_iter().map(Scope::new).collect()));
        }
        let expires_at = self
            .token_expiry
            .map(SystemTime::from)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        TimeBoundAccessToken::with_expiry(token, expires_at)
    }

    /// Reads credentials from `path`.
    ///
    /// A missing file is `Ok(None)`; an unreadable or corrupt one is logged and also treated as
    /// absent so that the user simply authenticates again.
    pub async fn load(path: &Path) -> eyre::Result<Option<Self>> {
        if !tokio::fs::try_exists(path)
            .await
            .with_context(|| format!("check for credentials at {}", path.display()))?
        {
            tracing::debug!(path = %path.display(), "no stored credentials");
            return Ok(None);
        }
        let json = match tokio::fs::read_to_string(path).await {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(path = %path.display(), "cannot read stored credentials: {e}");
                return Ok(None);
            }
        };
        match serde_json::from_str(&json) {
            Ok(credentials) => Ok(Some(credentials)),
            Err(e) => {
                tracing::warn!(path = %path.display(), "ignoring corrupt stored credentials: {e}");
                Ok(None)
            }
        }
    }

    /// Writes credentials to `path`, creating its directory if needed.
    pub async fn save(&self, path: &Path) -> eyre::Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("create {}", dir.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("serialize credentials")?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("write credentials to {}", path.display()))?;
        tracing::debug!(path = %path.display(), "stored credentials");
        Ok(())
    }
}
