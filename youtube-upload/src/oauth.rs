//! OAuth 2.0 management for YouTube API authentication.
//!
//! This module encapsulates the OAuth operations needed to upload videos: reading the
//! application's client secrets, the interactive authorization flow (browser or console), and
//! token refresh.

use crate::error::UploadError;
use crate::options::CodeRetrieval;
use eyre::Context;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::service::service_fn;
use hyper::{Request, Response, body};
use oauth2::basic::{BasicClient, BasicTokenResponse};
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, Scope, TokenResponse, TokenUrl,
};
use serde::Deserialize;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Google's OAuth2 endpoints, used when the client secrets file doesn't name them.
const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Loopback redirect used by the console flow when the client secrets list none.
const DEFAULT_REDIRECT_URL: &str = "http://localhost";

/// Scope needed for `videos.insert`.
pub const UPLOAD_SCOPE: &str = "https://www.googleapis.com/auth/youtube.upload";

const OAUTH_DONE: &str = "<html><head><title>youtube-upload</title></head>\
    <body><p>The authentication flow has completed. You may close this window.</p></body></html>";

type PendingCode<'a> = Pin<Box<dyn Future<Output = eyre::Result<AuthorizationCode>> + 'a>>;

/// The application credentials from a Google client secrets file.
///
/// See: <https://developers.google.com/identity/protocols/oauth2/native-app>
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

fn default_auth_uri() -> String {
    AUTH_URL.to_string()
}

fn default_token_uri() -> String {
    TOKEN_URL.to_string()
}

/// The on-disk layout: the secrets sit under `installed` for desktop apps, `web` otherwise.
#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    /// Parses the contents of a client secrets JSON file.
    pub fn from_json(json: &str) -> eyre::Result<Self> {
        let file: ClientSecretsFile =
            serde_json::from_str(json).context("parse client secrets JSON")?;
        file.installed
            .or(file.web)
            .ok_or_else(|| eyre::eyre!("client secrets have neither an 'installed' nor a 'web' section"))
    }

    /// Reads a client secrets JSON file.
    pub async fn load(path: &Path) -> eyre::Result<Self> {
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("read client secrets from {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("load {}", path.display()))
    }
}

/// Manages OAuth 2.0 authentication flows for YouTube API access.
///
/// The OAuthManager encapsulates all OAuth operations, providing a consistent interface
/// for both initial user authentication and token refresh operations.
#[derive(Debug, Clone)]
pub struct OAuthManager {
    secrets: ClientSecrets,
    http_client: reqwest::Client,
}

impl OAuthManager {
    /// Creates a new OAuth manager.
    ///
    /// # Arguments
    ///
    /// * `secrets` - The application's client id and secret, and the endpoints to use
    /// * `http_client` - Client for token requests; it must not follow redirects
    pub fn new(secrets: ClientSecrets, http_client: reqwest::Client) -> Self {
        Self {
            secrets,
            http_client,
        }
    }

    /// Performs a complete OAuth 2.0 authorization flow to obtain a new access token.
    ///
    /// With [`CodeRetrieval::Browser`] the consent page is opened in the user's browser and the
    /// redirect is caught by a one-shot local HTTP server. With [`CodeRetrieval::Console`] the
    /// consent URL is printed and the user pastes back the code (or the whole URL they were
    /// redirected to).
    ///
    /// A failed code exchange is reported as [`UploadError::FlowExchange`].
    pub async fn authenticate(&self, retrieval: CodeRetrieval) -> eyre::Result<BasicTokenResponse> {
        let csrf = CsrfToken::new_random();
        let (redirect_url, eventually_code): (RedirectUrl, PendingCode<'_>) = match retrieval {
            CodeRetrieval::Browser => {
                let (url, code) = self
                    .setup_redirect(csrf.clone())
                    .await
                    .context("set up redirect endpoint")?;
                (url, Box::pin(code))
            }
            CodeRetrieval::Console => {
                let url = self
                    .secrets
                    .redirect_uris
                    .first()
                    .map(String::as_str)
                    .unwrap_or(DEFAULT_REDIRECT_URL);
                let url = RedirectUrl::new(url.to_string()).context("construct redirect url")?;
                (url, Box::pin(read_console_code(csrf.clone())))
            }
        };

        let client = BasicClient::new(ClientId::new(self.secrets.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.secrets.client_secret.clone()))
            .set_auth_uri(
                AuthUrl::new(self.secrets.auth_uri.clone()).context("invalid authorization URL")?,
            )
            .set_redirect_uri(redirect_url.clone());

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let (auth_url, _csrf_token) = client
            // We never re-use the CSRF since we only go through the flow exactly once.
            .authorize_url(move || csrf.clone())
            .add_scope(Scope::new(UPLOAD_SCOPE.to_string()))
            .set_pkce_challenge(pkce_challenge)
            .url();

        tracing::info!(url = %auth_url, ?retrieval, "asking user to follow OAuth flow");
        match retrieval {
            CodeRetrieval::Browser => {
                eprintln!("Opening the authentication page in your browser:\n\n  {auth_url}\n");
                webbrowser::open(auth_url.as_ref()).context("open user's browser")?;
            }
            CodeRetrieval::Console => {
                eprintln!(
                    "Open this URL in a browser and authorize access:\n\n  {auth_url}\n\n\
                     Then paste the code (or the address you were redirected to) here:"
                );
            }
        }
        let authorization_code = eventually_code
            .await
            .context("await user authorization code")?;

        self.exchange_code(authorization_code, redirect_url, pkce_verifier)
            .await
    }

    /// Trades an authorization code for a token at the token endpoint.
    ///
    /// A failed exchange is reported as [`UploadError::FlowExchange`].
    async fn exchange_code(
        &self,
        code: AuthorizationCode,
        redirect_url: RedirectUrl,
        pkce_verifier: PkceCodeVerifier,
    ) -> eyre::Result<BasicTokenResponse> {
        let client = BasicClient::new(ClientId::new(self.secrets.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.secrets.client_secret.clone()))
            .set_token_uri(
                TokenUrl::new(self.secrets.token_uri.clone()).context("invalid token URL")?,
            )
            .set_redirect_uri(redirect_url);

        let token = client
            .exchange_code(code)
            .set_pkce_verifier(pkce_verifier)
            .request_async(&self.http_client)
            .await
            .map_err(|e| UploadError::FlowExchange(e.to_string()))?;

        tracing::debug!(
            has_refresh_token = token.refresh_token().is_some(),
            "obtained new OAuth token"
        );
        Ok(token)
    }

    /// Attempts to refresh an existing OAuth token using its refresh token.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(new_token))` - Refresh succeeded, new token is available
    /// * `Ok(None)` - The refresh token was rejected or there isn't one
    /// * `Err(_)` - Network or other error occurred during refresh attempt
    ///
    /// When refresh yields `None`, the user has to go through [`Self::authenticate`] again.
    pub async fn refresh_token(
        &self,
        token: &BasicTokenResponse,
    ) -> eyre::Result<Option<BasicTokenResponse>> {
        let Some(refresh_token) = token.refresh_token() else {
            tracing::warn!("no refresh token available, cannot refresh");
            return Ok(None);
        };

        tracing::debug!("attempting to refresh OAuth token");

        // no redirect URL needed for a refresh
        let client = BasicClient::new(ClientId::new(self.secrets.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.secrets.client_secret.clone()))
            .set_token_uri(
                TokenUrl::new(self.secrets.token_uri.clone()).context("invalid token URL")?,
            );

        match client
            .exchange_refresh_token(refresh_token)
            .request_async(&self.http_client)
            .await
        {
            Ok(new_token) => {
                tracing::debug!("successfully refreshed OAuth token");
                Ok(Some(new_token))
            }
            Err(ref e @ oauth2::RequestTokenError::ServerResponse(ref sr))
                if matches!(
                    sr.error(),
                    oauth2::basic::BasicErrorResponseType::InvalidGrant
                ) =>
            {
                tracing::warn!("OAuth refresh token considered invalid grant: {}", e);
                Ok(None)
            }
            Err(e) => Err(e).context("exchange refresh token"),
        }
    }

    /// Sets up a local HTTP server to receive the OAuth authorization callback.
    ///
    /// Creates a temporary HTTP server on a random local port to handle the OAuth
    /// redirect after user authorization. The server validates the CSRF token and
    /// extracts the authorization code from the callback.
    ///
    /// # Returns
    ///
    /// A tuple containing:
    /// - The redirect URL to use in the OAuth flow
    /// - A future that resolves to the authorization code when the callback is received
    async fn setup_redirect(
        &self,
        csrf: CsrfToken,
    ) -> eyre::Result<(
        RedirectUrl,
        impl Future<Output = eyre::Result<AuthorizationCode>>,
    )> {
        let socket = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .context("bind to localhost")?;
        let addr = socket.local_addr().context("get local address")?;
        let url = RedirectUrl::new(format!("http://{}:{}", addr.ip(), addr.port()))
            .context("construct redirect url")?;
        let (tx, rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let r = async move {
                let (conn, _) = socket.accept().await.context("accept")?;
                let conn = hyper_util::rt::TokioIo::new(conn);
                let (got, mut gotten) = tokio::sync::mpsc::channel(1);
                let service = service_fn(move |req: Request<body::Incoming>| {
                    let csrf = csrf.clone();
                    let got = got.clone();
                    async move {
                        let query = req.uri().query().unwrap_or("");
                        let code = match code_from_query(query, &csrf) {
                            Ok(code) => code,
                            Err(e) => return Err(e),
                        };
                        if got.send(code).await.is_err() {
                            return Err("redirect listener went away");
                        }
                        Ok(Response::new(Full::<Bytes>::from(OAUTH_DONE)))
                    }
                });
                let mut serve = std::pin::pin!(
                    hyper::server::conn::http1::Builder::new().serve_connection(conn, service)
                );

                tokio::select! {
                    exit = &mut serve => {
                        if let Err(e) = exit {
                            Err(e).context("redirect server got bad request")
                        } else {
                            eyre::bail!("redirect server exit prematurely");
                        }
                    }
                    code = gotten.recv() => {
                        serve.as_mut().graceful_shutdown();
                        // let the confirmation page reach the browser
                        if let Err(e) = serve.await {
                            tracing::debug!("redirect connection closed uncleanly: {e}");
                        }
                        code.ok_or_else(|| eyre::eyre!("redirect server dropped the code"))
                    }
                }
            };
            let _ = tx.send(r.await);
        });
        Ok((url, async move {
            rx.await.context("redirect future dropped prematurely")?
        }))
    }
}

/// Extracts the authorization code from a redirect query string, checking the CSRF state.
fn code_from_query(query: &str, csrf: &CsrfToken) -> Result<AuthorizationCode, &'static str> {
    let mut presented_state = None;
    let mut presented_code = None;
    let mut presented_error = None;
    for (k, v) in form_urlencoded::parse(query.as_bytes()) {
        match &*k {
            "state" => presented_state = Some(v),
            "code" => presented_code = Some(v),
            "error" => presented_error = Some(v),
            _ => {}
        }
    }
    if presented_error.is_some() {
        return Err("authorization was denied");
    }
    if presented_state.as_deref() != Some(csrf.secret().as_str()) {
        return Err("invalid csrf token");
    }
    let Some(code) = presented_code else {
        return Err("no authorization code found");
    };
    Ok(AuthorizationCode::new(code.into_owned()))
}

/// Interprets what the user pasted in the console flow: a bare code, or the redirect URL.
fn code_from_console_input(
    input: &str,
    csrf: &CsrfToken,
) -> Result<AuthorizationCode, &'static str> {
    let input = input.trim();
    if input.is_empty() {
        return Err("no authorization code entered");
    }
    match input.split_once('?') {
        Some((_, query)) if input.contains("code=") || input.contains("error=") => {
            code_from_query(query.split('#').next().unwrap_or(query), csrf)
        }
        _ => Ok(AuthorizationCode::new(input.to_string())),
    }
}

async fn read_console_code(csrf: CsrfToken) -> eyre::Result<AuthorizationCode> {
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("read authorization code from stdin")?;
    code_from_console_input(&line, &csrf).map_err(|e| eyre::eyre!(e))
}


#[cfg(test)]
mod tests {
    use super::testing::{field, secrets, token_endpoint};
    use super::*;
    use oauth2::basic::BasicTokenType;
    use oauth2::{AccessToken, EmptyExtraTokenFields, RefreshToken};

    fn token_with_refresh(refresh: Option<&str>) -> BasicTokenResponse {
        let mut token = BasicTokenResponse::new(
            AccessToken::new("old".into()),
            BasicTokenType::Bearer,
            EmptyExtraTokenFields {},
        );
        token.set_refresh_token(refresh.map(|r| RefreshToken::new(r.into())));
        token
    }

    fn manager(token_uri: &str) -> OAuthManager {
        OAuthManager::new(
            secrets(token_uri),
            crate::youtube_api::http_client(None).unwrap(),
        )
    }

    #[tokio::test]
    async fn refresh_sends_the_refresh_token() {
        let (uri, requests) = token_endpoint(
            200,
            r#"{"access_token":"new","token_type":"Bearer","expires_in":3600}"#,
        )
        .await;
        let refreshed = manager(&uri)
            .refresh_token(&token_with_refresh(Some("1//r")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(refreshed.access_token().secret(), "new");
        assert_eq!(field(&requests, 0, "grant_type").as_deref(), Some("refresh_token"));
        assert_eq!(field(&requests, 0, "refresh_token").as_deref(), Some("1//r"));
    }

    #[tokio::test]
    async fn invalid_grant_means_authorize_again() {
        let (uri, requests) = token_endpoint(
            400,
            r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#,
        )
        .await;
        let refreshed = manager(&uri)
            .refresh_token(&token_with_refresh(Some("1//r")))
            .await
            .unwrap();
        assert!(refreshed.is_none());
        assert_eq!(requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn no_refresh_token_skips_the_endpoint() {
        let (uri, requests) = token_endpoint(500, "{}").await;
        let refreshed = manager(&uri)
            .refresh_token(&token_with_refresh(None))
            .await
            .unwrap();
        assert!(refreshed.is_none());
        assert!(requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_code_exchange_is_a_flow_exchange_error() {
        let (uri, requests) = token_endpoint(
            400,
            r#"{"error":"invalid_grant","error_description":"Malformed auth code."}"#,
        )
        .await;
        let (_, verifier) = PkceCodeChallenge::new_random_sha256();
        let err = manager(&uri)
            .exchange_code(
                AuthorizationCode::new("4/bogus".into()),
                RedirectUrl::new("http://localhost".into()).unwrap(),
                verifier,
            )
            .await
            .unwrap_err();
        let err = UploadError::from_report(err);
        assert_eq!(err.kind(), "FlowExchangeError");
        assert_eq!(err.exit_code(), 4);
        assert_eq!(field(&requests, 0, "code").as_deref(), Some("4/bogus"));
        assert_eq!(field(&requests, 0, "grant_type").as_deref(), Some("authorization_code"));
    }

    #[tokio::test]
    async fn code_exchange_yields_a_token() {
        let (uri, _) = token_endpoint(
            200,
            r#"{"access_token":"ya29.a","token_type":"Bearer","expires_in":3599,"refresh_token":"1//r"}"#,
        )
        .await;
        let (_, verifier) = PkceCodeChallenge::new_random_sha256();
        let token = manager(&uri)
            .exchange_code(
                AuthorizationCode::new("4/good".into()),
                RedirectUrl::new("http://localhost".into()).unwrap(),
                verifier,
            )
            .await
            .unwrap();
        assert_eq!(token.access_token().secret(), "ya29.a");
        assert_eq!(token.refresh_token().map(|t| t.secret().as_str()), Some("1//r"));
    }

    #[test]
    fn installed_client_secrets() {
        let secrets = ClientSecrets::from_json(
            r#"{"installed":{"client_id":"id.apps.googleusercontent.com","client_secret":"s3cret",
                "redirect_uris":["http://localhost"],"project_id":"p"}}"#,
        )
        .unwrap();
        assert_eq!(secrets.client_id, "id.apps.googleusercontent.com");
        assert_eq!(secrets.client_secret, "s3cret");
        assert_eq!(secrets.auth_uri, AUTH_URL);
        assert_eq!(secrets.token_uri, TOKEN_URL);
        assert_eq!(secrets.redirect_uris, ["http://localhost"]);
    }

    #[test]
    fn web_client_secrets() {
        let secrets = ClientSecrets::from_json(
            r#"{"web":{"client_id":"w","client_secret":"x","token_uri":"https://example.com/token"}}"#,
        )
        .unwrap();
        assert_eq!(secrets.client_id, "w");
        assert_eq!(secrets.token_uri, "https://example.com/token");
    }

    #[test]
    fn client_secrets_need_a_section() {
        assert!(ClientSecrets::from_json(r#"{"other":{}}"#).is_err());
        assert!(ClientSecrets::from_json("not json").is_err());
    }

    #[test]
    fn redirect_query_is_validated() {
        let csrf = CsrfToken::new("state123".to_string());
        let code = code_from_query("state=state123&code=4%2Fabc&scope=x", &csrf).unwrap();
        assert_eq!(code.secret(), "4/abc");

        assert_eq!(
            code_from_query("state=other&code=abc", &csrf).unwrap_err(),
            "invalid csrf token"
        );
        assert_eq!(
            code_from_query("state=state123", &csrf).unwrap_err(),
            "no authorization code found"
        );
        assert_eq!(
            code_from_query("error=access_denied&state=state123", &csrf).unwrap_err(),
            "authorization was denied"
        );
    }

    #[test]
    fn console_accepts_bare_codes_and_urls() {
        let csrf = CsrfToken::new("s".to_string());
        let code = code_from_console_input("  4/0AbCdEf \n", &csrf).unwrap();
        assert_eq!(code.secret(), "4/0AbCdEf");

        let code =
            code_from_console_input("http://localhost/?state=s&code=4/xyz&scope=a", &csrf).unwrap();
        assert_eq!(code.secret(), "4/xyz");

        assert!(code_from_console_input("http://localhost/?state=t&code=4/xyz", &csrf).is_err());
        assert!(code_from_console_input("\n", &csrf).is_err());
    }
}
