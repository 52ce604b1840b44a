//! Core YouTube API client functionality and authentication management.

use crate::error::UploadError;
use crate::oauth::OAuthManager;
use eyre::Context;
use http::{Method, StatusCode};
use oauth2::TokenResponse;
use oauth2::basic::BasicTokenResponse;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tracing::instrument;

#[derive(Debug, Clone)]
pub struct TimeBoundAccessToken {
    /// The current OAuth2 token
    token: BasicTokenResponse,
    /// When the current access token expires (with safety buffer)
    expires_at: SystemTime,
}

impl TimeBoundAccessToken {
    /// Creates a new YouTube token with calculated expiry time.
    ///
    /// The expiry time is calculated from the token's `expires_in` field minus
    /// a 5-minute safety buffer to prevent edge-case failures.
    pub fn new(token: BasicTokenResponse) -> Self {
        Self {
            expires_at: Self::calculate_token_expiry(&token),
            token,
        }
    }

    /// Creates a token whose expiry is already known, e.g. because it was stored on disk.
    pub fn with_expiry(token: BasicTokenResponse, expires_at: SystemTime) -> Self {
        Self { token, expires_at }
    }

    pub fn raw_token(&self) -> &BasicTokenResponse {
        &self.token
    }

    pub fn expires_at(&self) -> SystemTime {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        SystemTime::now() >= self.expires_at
    }

    /// Refreshes this token using the provided OAuth manager, preserving the refresh token.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - Token was successfully refreshed
    /// * `Ok(false)` - Refresh failed (invalid grant, no refresh token, etc.)
    /// * `Err(_)` - Network or other error occurred
    pub async fn refresh(&mut self, oauth_manager: &OAuthManager) -> eyre::Result<bool> {
        tracing::trace!("refreshing token");
        match oauth_manager
            .refresh_token(&self.token)
            .await
            .context("refresh OAuth token")?
        {
            Some(new_token) => {
                let old_token = std::mem::replace(&mut self.token, new_token);

                // If the new token doesn't have a refresh token, preserve the original one
                if self.token.refresh_token().is_none() {
                    tracing::trace!("new token lacks refresh token, preserving original");
                    self.token
                        .set_refresh_token(old_token.refresh_token().cloned());
                } else {
                    tracing::debug!("new token includes refresh token");
                }

                self.expires_at = Self::calculate_token_expiry(&self.token);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Uses the current time + expires_in duration - 5 minute safety buffer.
    /// If no expires_in is provided, assumes a conservative 55-minute lifetime.
    fn calculate_token_expiry(token: &BasicTokenResponse) -> SystemTime {
        let now = SystemTime::now();
        if let Some(expires_in) = token.expires_in() {
            now + expires_in.saturating_sub(Duration::from_secs(300))
        } else {
            now + Duration::from_secs(3300)
        }
    }
}

/// Tunables for resumable uploads.
#[derive(Debug, Clone)]
pub struct UploadSettings {
    /// The `videos.insert` media upload endpoint.
    pub endpoint: String,
    /// Bytes sent per request; YouTube requires a multiple of 256 KiB except for the last chunk.
    pub chunk_size: usize,
    /// How often a transient failure is retried before giving up.
    pub max_retries: u32,
    /// Delay before the first retry; doubled on each further attempt.
    pub initial_backoff: Duration,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://www.googleapis.com/upload/youtube/v3/videos".to_string(),
            chunk_size: 32 * 256 * 1024,
            max_retries: 10,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

/// Client for interacting with the YouTube Data API v3.
///
/// The client wraps an OAuth2 token and keeps it fresh: before each request an expired access
/// token is refreshed through the OAuth manager. A client built from a bare access token has no
/// manager and can only use the token as given.
#[derive(Debug, Clone)]
pub struct YouTubeClient {
    /// The current OAuth2 token.
    token: Arc<Mutex<TimeBoundAccessToken>>,
    /// OAuth manager for refreshing tokens, absent for bare access tokens
    oauth_manager: Option<Arc<OAuthManager>>,
    /// HTTP client for API requests
    client: reqwest::Client,
    pub(crate) upload: UploadSettings,
}

impl YouTubeClient {
    /// Creates a client that refreshes its token through `oauth_manager` when needed.
    pub fn new(
        token: TimeBoundAccessToken,
        oauth_manager: Arc<OAuthManager>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            token: Arc::new(Mutex::new(token)),
            oauth_manager: Some(oauth_manager),
            client,
            upload: UploadSettings::default(),
        }
    }

    /// Creates a client around a bare access token that cannot be refreshed.
    ///
    /// If the API rejects the token, requests fail with [`UploadError::AccessTokenCredentials`].
    pub fn with_access_token(access_token: String, client: reqwest::Client) -> Self {
        let token = BasicTokenResponse::new(
            oauth2::AccessToken::new(access_token),
            oauth2::basic::BasicTokenType::Bearer,
            oauth2::EmptyExtraTokenFields {},
        );
        // we don't know when it expires; the API will tell us
        let far_future = SystemTime::now() + Duration::from_secs(365 * 24 * 3600);
        Self {
            token: Arc::new(Mutex::new(TimeBoundAccessToken::with_expiry(
                token, far_future,
            ))),
            oauth_manager: None,
            client,
            upload: UploadSettings::default(),
        }
    }

    /// Overrides the resumable upload settings.
    pub fn with_upload_settings(mut self, upload: UploadSettings) -> Self {
        self.upload = upload;
        self
    }

    /// Returns a clone of the current token.
    pub async fn token(&self) -> TimeBoundAccessToken {
        self.token.lock().await.clone()
    }

    /// Whether the token can be refreshed (and so is worth persisting).
    pub fn is_refreshable(&self) -> bool {
        self.oauth_manager.is_some()
    }

    pub(crate) fn http_client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Gets a guaranteed-fresh access token, refreshing if necessary.
    ///
    /// With `force`, the token is refreshed even if it hasn't expired yet, which is what we
    /// want after the API rejected it.
    #[instrument(skip(self), level = "trace")]
    pub(crate) async fn fresh_access_token(&self, force: bool) -> eyre::Result<String> {
        let mut token = self.token.lock().await;

        if force || token.is_expired() {
            let Some(oauth_manager) = &self.oauth_manager else {
                return Err(UploadError::AccessTokenCredentials(
                    "the access token was rejected and cannot be refreshed".to_string(),
                )
                .into());
            };

            tracing::debug!(force, "access token expired, attempting refresh");
            if token.refresh(oauth_manager).await? {
                tracing::debug!("access token successfully refreshed");
            } else {
                tracing::error!("access token refresh failed, client is unusable");
                return Err(UploadError::Authentication(
                    "unable to refresh expired access token".to_string(),
                )
                .into());
            }
        }

        Ok(token.token.access_token().secret().to_string())
    }

    /// Makes an authenticated HTTP request to the YouTube API with common error handling.
    ///
    /// This method consolidates the shared logic across YouTube API requests:
    /// - Token freshness validation and refresh
    /// - Authorization header setup
    /// - Query parameters, extra headers and an optional JSON body
    /// - Status code validation and error classification
    ///
    /// A `401 Unauthorized` triggers one forced token refresh and a retry. Any other
    /// unsuccessful status is turned into an error by [`error_for_status`].
    #[instrument(skip(self, headers, json_body), level = "trace")]
    pub(crate) async fn make_authenticated_request(
        &self,
        method: Method,
        url: &str,
        query_params: Option<&[(&str, &str)]>,
        headers: &[(&'static str, String)],
        json_body: Option<&impl Serialize>,
    ) -> eyre::Result<reqwest::Response> {
        let mut force_refresh = false;
        loop {
            let access_token = self.fresh_access_token(force_refresh).await?;

            let mut request = self
                .client
                .request(method.clone(), url)
                .header("Authorization", format!("Bearer {}", access_token));

            if let Some(params) = query_params {
                request = request.query(params);
            }
            for (name, value) in headers {
                request = request.header(*name, value);
            }
            if let Some(body) = json_body {
                request = request
                    .header("Content-Type", "application/json; charset=UTF-8")
                    .json(body);
            }

            let response = request
                .send()
                .await
                .with_context(|| format!("send {} request to YouTube API: {}", method, url))?;

            if response.status() == StatusCode::UNAUTHORIZED
                && !force_refresh
                && self.is_refreshable()
            {
                tracing::warn!("YouTube API rejected the access token, refreshing");
                force_refresh = true;
                continue;
            }

            return self.error_for_status(&method, url, response).await;
        }
    }

    /// Passes successful responses through and classifies failures.
    pub(crate) async fn error_for_status(
        &self,
        method: &Method,
        url: &str,
        response: reqwest::Response,
    ) -> eyre::Result<reqwest::Response> {
        let status_code = response.status();
        if status_code.is_success() {
            return Ok(response);
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        let message = format!(
            "YouTube API {} request to {} failed with status {}: {}",
            method, url, status_code, error_text
        );
        Err(match status_code {
            StatusCode::UNAUTHORIZED if !self.is_refreshable() => {
                UploadError::AccessTokenCredentials(message).into()
            }
            StatusCode::UNAUTHORIZED => UploadError::Authentication(message).into(),
            StatusCode::NOT_IMPLEMENTED => UploadError::NotImplemented(message).into(),
            status => ApiError { status, message }.into(),
        })
    }
}

/// An unsuccessful API response that doesn't map to a dedicated exit code.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

/// Builds the HTTP client used for both OAuth and API requests.
///
/// Redirects are never followed; this also keeps `308 Resume Incomplete` responses from the
/// upload endpoint visible to us. Certificates from `ca_certs_file` are trusted in addition to
/// the system roots.
pub fn http_client(ca_certs_file: Option<&Path>) -> eyre::Result<reqwest::Client> {
    let mut builder = reqwest::ClientBuilder::new()
        // SSRF no thank you.
        .redirect(reqwest::redirect::Policy::none())
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")));

    if let Some(path) = ca_certs_file {
        let pem = std::fs::read(path)
            .with_context(|| format!("read CA certificates from {}", path.display()))?;
        let certs = reqwest::Certificate::from_pem_bundle(&pem)
            .with_context(|| format!("parse CA certificates in {}", path.display()))?;
        tracing::debug!(count = certs.len(), "trusting additional CA certificates");
        for cert in certs {
            builder = builder.add_root_certificate(cert);
        }
    }

    builder.build().context("build HTTP client")
}
