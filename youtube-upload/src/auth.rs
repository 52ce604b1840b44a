//! Produces an authenticated [`YouTubeClient`] from the command-line auth settings.

use crate::credentials::{self, StoredCredentials};
use crate::error::UploadError;
use crate::oauth::{ClientSecrets, OAuthManager};
use crate::options::AuthConfig;
use crate::youtube_api::{TimeBoundAccessToken, YouTubeClient, http_client};
use eyre::Context;
use std::ops::AsyncFnOnce;
use std::sync::Arc;

/// Builds a client for the configured credentials.
///
/// A bare `--access-token` is used as-is and never stored. Otherwise stored credentials are
/// reused (refreshed if they have expired), and the interactive OAuth flow runs only when there
/// are none or they can no longer be refreshed. New or refreshed credentials are written back to
/// the credentials file.
pub async fn authenticate(config: &AuthConfig) -> eyre::Result<YouTubeClient> {
    let http = http_client(config.ca_certs_file.as_deref()).context("build HTTP client")?;

    if let Some(access_token) = &config.access_token {
        tracing::debug!("using access token from the command line");
        return Ok(YouTubeClient::with_access_token(access_token.clone(), http));
    }

    let secrets_path = credentials::client_secrets_path(config.client_secrets.as_deref());
    let secrets = ClientSecrets::load(&secrets_path)
        .await
        .map_err(|e| UploadError::Authentication(format!("{e:#}")))?;
    let oauth_manager = Arc::new(OAuthManager::new(secrets, http.clone()));

    let credentials_path = credentials::credentials_path(config.credentials_file.as_deref());
    let stored = StoredCredentials::load(&credentials_path)
        .await
        .context("load stored credentials")?;

    let token = stored_or_new_token(stored, &oauth_manager, async || {
        authorize(&oauth_manager, config).await
    })
    .await?;

    StoredCredentials::from_token(&token)
        .save(&credentials_path)
        .await?;

    Ok(YouTubeClient::new(token, oauth_manager, http))
}

/// Reuses `stored` if it is still valid or can be refreshed, and calls `authorize` otherwise.
async fn stored_or_new_token<F>(
    stored: Option<StoredCredentials>,
    oauth_manager: &OAuthManager,
    authorize: F,
) -> eyre::Result<TimeBoundAccessToken>
where
    F: AsyncFnOnce() -> eyre::Result<TimeBoundAccessToken>,
{
    let Some(stored) = stored else {
        return authorize().await;
    };

    let mut token = stored.into_token();
    if !token.is_expired() {
        tracing::debug!("stored access token is still valid");
        Ok(token)
    } else if token
        .refresh(oauth_manager)
        .await
        .context("refresh stored credentials")?
    {
        tracing::info!("refreshed stored credentials");
        Ok(token)
    } else {
        tracing::warn!("stored credentials cannot be refreshed, authorizing again");
        authorize().await
    }
}

async fn authorize(
    oauth_manager: &OAuthManager,
    config: &AuthConfig,
) -> eyre::Result<TimeBoundAccessToken> {
    let raw = oauth_manager
        .authenticate(config.code_retrieval)
        .await
        .context("authorize user to YouTube")?;
    Ok(TimeBoundAccessToken::new(raw))
}

/// Writes the client's current token back to the credentials file.
///
/// The token may have been refreshed during the uploads. Clients built from a bare access token
/// are not persisted.
pub async fn persist(client: &YouTubeClient, config: &AuthConfig) -> eyre::Result<()> {
    if !client.is_refreshable() {
        return Ok(());
    }
    let path = credentials::credentials_path(config.credentials_file.as_deref());
    StoredCredentials::from_token(&client.token().await)
        .save(&path)
        .await
}
