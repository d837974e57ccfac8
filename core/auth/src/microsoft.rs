//! Microsoft identity platform client-credentials flow for Graph.

use async_trait::async_trait;
use oauth2::basic::BasicClient;
use oauth2::{
    AuthType, ClientId, ClientSecret, EndpointNotSet, EndpointSet, RefreshToken, Scope, TokenUrl,
};
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use zeroize::Zeroizing;

use drivelink_common::config::{CLIENT_ID, CLIENT_SECRET, GRAPH_TOKEN_FILE, TENANT_ID};
use drivelink_common::{Configuration, Error, Result};

use crate::authenticator::{Authenticator, TokenProvider};
use crate::credential::Credential;
use crate::oauth::{credential_from_response, http_client};
use crate::store::FileCredentialStore;

/// Login authority host.
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";

/// Scope granting every application permission configured for the app.
pub const GRAPH_DEFAULT_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Default token file name.
pub const DEFAULT_TOKEN_FILE: &str = "graph_token.json";

type GraphClient =
    BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// App registration used for the client-credentials grant.
#[derive(Clone)]
pub struct MicrosoftAuthConfig {
    pub client_id: String,
    pub client_secret: Zeroizing<String>,
    pub tenant_id: String,
    pub authority: String,
}

impl fmt::Debug for MicrosoftAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MicrosoftAuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("tenant_id", &self.tenant_id)
            .field("authority", &self.authority)
            .finish()
    }
}

impl MicrosoftAuthConfig {
    /// Build from `CLIENT_ID`, `CLIENT_SECRET` and `TENANT_ID`.
    ///
    /// # Errors
    /// - `MissingConfig` listing every absent key
    pub fn from_configuration(config: &Configuration) -> Result<Self> {
        let missing: Vec<String> = [CLIENT_ID, CLIENT_SECRET, TENANT_ID]
            .iter()
            .filter(|key| config.get(key).is_none())
            .map(|key| key.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(Error::MissingConfig(missing));
        }

        Ok(Self {
            client_id: config.require(CLIENT_ID)?.to_string(),
            client_secret: Zeroizing::new(config.require(CLIENT_SECRET)?.to_string()),
            tenant_id: config.require(TENANT_ID)?.to_string(),
            authority: DEFAULT_AUTHORITY.to_string(),
        })
    }

    /// Token endpoint for the configured tenant.
    pub fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority.trim_end_matches('/'),
            self.tenant_id
        )
    }
}

/// Client-credentials token provider. Acquisition is non-interactive.
pub struct MicrosoftClientCredentials {
    config: MicrosoftAuthConfig,
    scopes: Vec<String>,
    http: oauth2::reqwest::Client,
}

impl MicrosoftClientCredentials {
    /// Create the provider requesting the Graph `.default` scope.
    pub fn new(config: MicrosoftAuthConfig) -> Result<Self> {
        Ok(Self {
            config,
            scopes: vec![GRAPH_DEFAULT_SCOPE.to_string()],
            http: http_client()?,
        })
    }

    /// Authenticator persisting to `GRAPH_TOKEN_FILE` (default
    /// `graph_token.json` in the user config directory).
    pub fn authenticator(config: &Configuration) -> Result<Authenticator> {
        let provider = Self::new(MicrosoftAuthConfig::from_configuration(config)?)?;
        let store =
            FileCredentialStore::in_config_dir(config.get_or(GRAPH_TOKEN_FILE, DEFAULT_TOKEN_FILE));
        debug!("Graph credential store: {}", store.path().display());
        Ok(Authenticator::new(Arc::new(store), Arc::new(provider)))
    }

    fn client(&self) -> Result<GraphClient> {
        Ok(BasicClient::new(ClientId::new(self.config.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.config.client_secret.to_string()))
            .set_auth_type(AuthType::RequestBody)
            .set_token_uri(
                TokenUrl::new(self.config.token_url())
                    .map_err(|e| Error::Config(format!("Invalid token URL: {}", e)))?,
            ))
    }
}

#[async_trait]
impl TokenProvider for MicrosoftClientCredentials {
    fn name(&self) -> &str {
        "microsoft"
    }

    // The client-credentials grant does not issue refresh tokens; this only
    // runs for credentials minted elsewhere.
    async fn refresh(&self, refresh_token: &str) -> Result<Credential> {
        let token = self
            .client()?
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .add_scopes(self.scopes.iter().cloned().map(Scope::new))
            .request_async(&self.http)
            .await
            .map_err(|e| Error::Auth(format!("Token refresh failed: {}", e)))?;

        Ok(credential_from_response(&token, &self.scopes))
    }

    async fn acquire(&self) -> Result<Credential> {
        debug!("Requesting client-credentials token for tenant {}", self.config.tenant_id);

        let token = self
            .client()?
            .exchange_client_credentials()
            .add_scopes(self.scopes.iter().cloned().map(Scope::new))
            .request_async(&self.http)
            .await
            .map_err(|e| Error::Auth(format!("Client-credentials grant failed: {}", e)))?;

        Ok(credential_from_response(&token, &self.scopes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_config() -> Configuration {
        Configuration::from_pairs([
            (CLIENT_ID, "app-id"),
            (CLIENT_SECRET, "app-secret"),
            (TENANT_ID, "contoso.onmicrosoft.com"),
        ])
    }

    #[test]
    fn test_config_from_configuration() {
        let config = MicrosoftAuthConfig::from_configuration(&full_config()).unwrap();
        assert_eq!(config.client_id, "app-id");
        assert_eq!(config.client_secret.as_str(), "app-secret");
        assert_eq!(
            config.token_url(),
            "https://login.microsoftonline.com/contoso.onmicrosoft.com/oauth2/v2.0/token"
        );
    }

    #[test]
    fn test_missing_keys_all_reported() {
        let config = Configuration::from_pairs([(CLIENT_ID, "app-id"), (TENANT_ID, "")]);
        match MicrosoftAuthConfig::from_configuration(&config).unwrap_err() {
            Error::MissingConfig(keys) => assert_eq!(keys, vec![CLIENT_SECRET, TENANT_ID]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_debug_hides_secret() {
        let config = MicrosoftAuthConfig::from_configuration(&full_config()).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("app-secret"));
        assert!(debug.contains("app-id"));
    }

    #[test]
    fn test_custom_authority_trailing_slash() {
        let mut config = MicrosoftAuthConfig::from_configuration(&full_config()).unwrap();
        config.authority = "https://login.example.test/".to_string();
        assert_eq!(
            config.token_url(),
            "https://login.example.test/contoso.onmicrosoft.com/oauth2/v2.0/token"
        );
    }

    #[test]
    fn test_provider_requests_default_scope() {
        let config = MicrosoftAuthConfig::from_configuration(&full_config()).unwrap();
        let provider = MicrosoftClientCredentials::new(config).unwrap();
        assert_eq!(provider.name(), "microsoft");
        assert_eq!(provider.scopes, vec![GRAPH_DEFAULT_SCOPE]);
        assert!(provider.client().is_ok());
    }
}
