//! Google installed-application OAuth2 flow.
//!
//! Authorization runs through the user's browser with a loopback redirect
//! to a one-shot listener on `127.0.0.1`. The returned code is exchanged
//! with PKCE, and `offline` access is requested so the credential carries a
//! refresh token.

use async_trait::async_trait;
use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet, EndpointSet,
    PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RefreshToken, Scope, TokenUrl,
};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use url::Url;

use drivelink_common::config::{GOOGLE_CREDENTIALS_FILE, GOOGLE_SCOPES, GOOGLE_TOKEN_FILE};
use drivelink_common::{Configuration, Error, Result};

use crate::authenticator::{Authenticator, TokenProvider};
use crate::credential::Credential;
use crate::oauth::{credential_from_response, http_client};
use crate::store::FileCredentialStore;

/// OAuth2 authorization endpoint.
const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
/// OAuth2 token endpoint.
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Default token file name.
pub const DEFAULT_TOKEN_FILE: &str = "token.json";

/// Scopes requested when `GOOGLE_SCOPES` is not set.
pub const DEFAULT_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/drive",
    "https://www.googleapis.com/auth/drive.file",
    "https://www.googleapis.com/auth/drive.metadata",
    "https://www.googleapis.com/auth/drive.appdata",
];

/// How long to wait for the browser to come back to the loopback listener.
const AUTHORIZATION_TIMEOUT: Duration = Duration::from_secs(300);

const SUCCESS_PAGE: &str = "<html><body><h3>Authorization complete.</h3>\
<p>You may close this window and return to the terminal.</p></body></html>";

type GoogleClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// OAuth2 client registration, as found in a downloaded client-secrets file.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    GOOGLE_AUTH_URL.to_string()
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URL.to_string()
}

#[derive(Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    /// Parse a client-secrets document. Both `installed` and `web`
    /// registrations are accepted, `installed` first.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: ClientSecretsFile = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Invalid client secrets: {}", e)))?;

        file.installed.or(file.web).ok_or_else(|| {
            Error::Config(
                "Client secrets contain neither an \"installed\" nor a \"web\" section".to_string(),
            )
        })
    }

    /// Read and parse a client-secrets file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Cannot read client secrets {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&json)
    }
}

/// Settings for the Google flow.
#[derive(Debug, Clone)]
pub struct GoogleAuthConfig {
    pub secrets: ClientSecrets,
    pub scopes: Vec<String>,
    /// Try to launch the system browser. The URL is always logged.
    pub open_browser: bool,
}

impl GoogleAuthConfig {
    /// Build from configuration: `GOOGLE_CREDENTIALS_FILE` is required,
    /// `GOOGLE_SCOPES` is an optional comma or whitespace separated list.
    pub fn from_configuration(config: &Configuration) -> Result<Self> {
        let path = config.require(GOOGLE_CREDENTIALS_FILE)?;
        let secrets = ClientSecrets::from_file(Path::new(path))?;

        let scopes = match config.get(GOOGLE_SCOPES) {
            Some(list) => parse_scopes(list),
            None => DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
        };

        Ok(Self {
            secrets,
            scopes,
            open_browser: true,
        })
    }
}

fn parse_scopes(list: &str) -> Vec<String> {
    list.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Installed-application token provider.
pub struct GoogleInstalledApp {
    config: GoogleAuthConfig,
    http: oauth2::reqwest::Client,
}

impl GoogleInstalledApp {
    /// Create the provider.
    pub fn new(config: GoogleAuthConfig) -> Result<Self> {
        Ok(Self {
            config,
            http: http_client()?,
        })
    }

    /// Authenticator persisting to [`GoogleInstalledApp::token_store`].
    pub fn authenticator(config: &Configuration) -> Result<Authenticator> {
        let provider = Self::new(GoogleAuthConfig::from_configuration(config)?)?;
        let store = Self::token_store(config);
        debug!("Google credential store: {}", store.path().display());
        Ok(Authenticator::new(Arc::new(store), Arc::new(provider)))
    }

    /// Cached credential location: `GOOGLE_TOKEN_FILE`, default `token.json`
    /// in the user config directory. Needs no client secrets.
    pub fn token_store(config: &Configuration) -> FileCredentialStore {
        FileCredentialStore::in_config_dir(config.get_or(GOOGLE_TOKEN_FILE, DEFAULT_TOKEN_FILE))
    }

    fn client(&self) -> Result<GoogleClient> {
        let secrets = &self.config.secrets;
        Ok(BasicClient::new(ClientId::new(secrets.client_id.clone()))
            .set_client_secret(ClientSecret::new(secrets.client_secret.clone()))
            .set_auth_uri(
                AuthUrl::new(secrets.auth_uri.clone())
                    .map_err(|e| Error::Config(format!("Invalid auth URL: {}", e)))?,
            )
            .set_token_uri(
                TokenUrl::new(secrets.token_uri.clone())
                    .map_err(|e| Error::Config(format!("Invalid token URL: {}", e)))?,
            ))
    }

    /// Build the consent URL for `redirect_uri`.
    ///
    /// Returns the URL, the CSRF state to verify on callback and the PKCE
    /// verifier for the code exchange.
    pub fn authorization_url(
        &self,
        redirect_uri: &str,
    ) -> Result<(Url, CsrfToken, PkceCodeVerifier)> {
        let redirect = RedirectUrl::new(redirect_uri.to_string())
            .map_err(|e| Error::Config(format!("Invalid redirect URL: {}", e)))?;
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();

        let (url, state) = self
            .client()?
            .set_redirect_uri(redirect)
            .authorize_url(CsrfToken::new_random)
            .add_scopes(self.config.scopes.iter().cloned().map(Scope::new))
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .set_pkce_challenge(challenge)
            .url();

        Ok((url, state, verifier))
    }

    async fn exchange_code(
        &self,
        code: String,
        redirect_uri: &str,
        verifier: PkceCodeVerifier,
    ) -> Result<Credential> {
        let redirect = RedirectUrl::new(redirect_uri.to_string())
            .map_err(|e| Error::Config(format!("Invalid redirect URL: {}", e)))?;

        let token = self
            .client()?
            .set_redirect_uri(redirect)
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(verifier)
            .request_async(&self.http)
            .await
            .map_err(|e| Error::Auth(format!("Token exchange failed: {}", e)))?;

        let credential = credential_from_response(&token, &self.config.scopes);
        if !credential.can_refresh() {
            warn!("No refresh token received; the credential cannot be renewed silently");
        }
        Ok(credential)
    }
}

#[async_trait]
impl TokenProvider for GoogleInstalledApp {
    fn name(&self) -> &str {
        "google"
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Credential> {
        let token = self
            .client()?
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| Error::Auth(format!("Token refresh failed: {}", e)))?;

        Ok(credential_from_response(&token, &self.config.scopes))
    }

    async fn acquire(&self) -> Result<Credential> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let port = listener.local_addr()?.port();
        let redirect_uri = format!("http://127.0.0.1:{}/", port);

        let (url, state, verifier) = self.authorization_url(&redirect_uri)?;

        info!("Please visit this URL to authorize this application: {}", url);
        if self.config.open_browser {
            if let Err(e) = open::that(url.as_str()) {
                warn!("Could not open a browser ({}); open the URL manually", e);
            }
        }

        let code = tokio::time::timeout(
            AUTHORIZATION_TIMEOUT,
            wait_for_code(&listener, state.secret()),
        )
        .await
        .map_err(|_| Error::Auth("Timed out waiting for browser authorization".to_string()))??;

        self.exchange_code(code, &redirect_uri, verifier).await
    }
}

/// Outcome of one request to the loopback listener.
#[derive(Debug, PartialEq, Eq)]
enum Callback {
    Code { code: String, state: String },
    Denied(String),
    /// Not an authorization redirect (e.g. favicon).
    Other,
}

/// Parse the request line of a redirect hitting the listener.
fn parse_callback(request_line: &str) -> Result<Callback> {
    let mut parts = request_line.split_whitespace();
    let (Some(_method), Some(target)) = (parts.next(), parts.next()) else {
        return Err(Error::Auth(format!(
            "Malformed redirect request: {:?}",
            request_line
        )));
    };

    let url = Url::parse("http://127.0.0.1")
        .and_then(|base| base.join(target))
        .map_err(|e| Error::Auth(format!("Malformed redirect target: {}", e)))?;

    let mut code = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => return Ok(Callback::Denied(value.into_owned())),
            _ => {}
        }
    }

    match (code, state) {
        (Some(code), Some(state)) => Ok(Callback::Code { code, state }),
        (Some(_), None) => Err(Error::Auth("Redirect is missing the state parameter".to_string())),
        _ => Ok(Callback::Other),
    }
}

async fn wait_for_code(listener: &TcpListener, expected_state: &str) -> Result<String> {
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!("Authorization redirect from {}", peer);

        let mut reader = BufReader::new(stream);
        let mut request_line = String::new();
        if reader.read_line(&mut request_line).await? == 0 {
            debug!("Connection from {} closed without a request", peer);
            continue;
        }

        // Drain the headers so closing the socket does not reset the reply.
        loop {
            let mut header = String::new();
            match reader.read_line(&mut header).await {
                Ok(n) if n > 0 && !header.trim_end().is_empty() => continue,
                _ => break,
            }
        }

        let outcome = parse_callback(request_line.trim_end());
        let (status, body) = match &outcome {
            Ok(Callback::Code { .. }) => ("200 OK", SUCCESS_PAGE),
            Ok(Callback::Other) => ("404 Not Found", ""),
            _ => ("400 Bad Request", "<html><body>Authorization failed.</body></html>"),
        };
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        let stream = reader.get_mut();
        if let Err(e) = stream.write_all(response.as_bytes()).await {
            debug!("Failed to answer authorization redirect: {}", e);
        }
        if let Err(e) = stream.shutdown().await {
            debug!("Failed to close authorization redirect: {}", e);
        }

        match outcome? {
            Callback::Code { code, state } => {
                if state != expected_state {
                    return Err(Error::Auth(
                        "State mismatch in authorization redirect".to_string(),
                    ));
                }
                return Ok(code);
            }
            Callback::Denied(reason) => {
                return Err(Error::Auth(format!("Authorization denied: {}", reason)));
            }
            Callback::Other => continue,
        }
    }
}
