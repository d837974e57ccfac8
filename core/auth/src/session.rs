//! Authenticated session handle shared by API clients.

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use drivelink_common::{Error, Result};

use crate::authenticator::Authenticator;
use crate::credential::Credential;

/// Holds the current credential and renews it through the authenticator
/// once it expires.
pub struct Session {
    authenticator: Option<Arc<Authenticator>>,
    credential: RwLock<Credential>,
}

impl Session {
    /// Authenticate and open a session.
    pub async fn start(authenticator: Arc<Authenticator>) -> Result<Self> {
        let credential = authenticator.get_valid_credential().await?;
        Ok(Self {
            authenticator: Some(authenticator),
            credential: RwLock::new(credential),
        })
    }

    /// Session over a fixed credential that is never renewed.
    pub fn from_credential(credential: Credential) -> Self {
        Self {
            authenticator: None,
            credential: RwLock::new(credential),
        }
    }

    /// Get a valid access token, renewing the credential if necessary.
    ///
    /// # Errors
    /// - `Auth` if the credential expired and cannot be renewed
    pub async fn access_token(&self) -> Result<String> {
        let credential = self.credential.read().await;

        if !credential.is_expired() {
            return Ok(credential.access_token.clone());
        }

        drop(credential);

        let mut credential = self.credential.write().await;

        // Double-check after acquiring write lock
        if !credential.is_expired() {
            return Ok(credential.access_token.clone());
        }

        let authenticator = self
            .authenticator
            .as_ref()
            .ok_or_else(|| Error::Auth("Session credential expired".to_string()))?;

        info!("Renewing expired {} credential", authenticator.provider_name());
        *credential = authenticator.get_valid_credential().await?;

        Ok(credential.access_token.clone())
    }

    /// `Authorization` header value.
    pub async fn bearer(&self) -> Result<String> {
        Ok(format!("Bearer {}", self.access_token().await?))
    }

    /// Snapshot of the current credential.
    pub async fn credential(&self) -> Credential {
        self.credential.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authenticator::tests::ScriptedProvider;
    use crate::store::{CredentialStore, MemoryCredentialStore};
    use chrono::Duration;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_fixed_session_returns_token() {
        let session = Session::from_credential(Credential::new("abc", None, Duration::hours(1)));
        assert_eq!(session.access_token().await.unwrap(), "abc");
        assert_eq!(session.bearer().await.unwrap(), "Bearer abc");
    }

    #[tokio::test]
    async fn test_fixed_session_expired_is_auth_error() {
        let session = Session::from_credential(Credential::new("abc", None, Duration::hours(-1)));
        assert!(matches!(session.access_token().await, Err(Error::Auth(_))));
    }

    #[tokio::test]
    async fn test_session_renews_expired_credential() {
        let store = Arc::new(MemoryCredentialStore::new());
        let provider = Arc::new(ScriptedProvider::new(true, true));
        let auth = Arc::new(Authenticator::new(store.clone(), provider.clone()));

        let session = Session::start(auth).await.unwrap();
        assert_eq!(session.access_token().await.unwrap(), "acquired");
        assert_eq!(provider.acquire_calls.load(Ordering::SeqCst), 1);

        // Force expiry of both the live and the stored credential.
        let expired = Credential::new("stale", Some("r9".into()), Duration::hours(-1));
        *session.credential.write().await = expired.clone();
        store.save(&expired).await.unwrap();

        assert_eq!(session.access_token().await.unwrap(), "refreshed-from-r9");
        assert_eq!(provider.refresh_calls.load(Ordering::SeqCst), 1);
    }
}
