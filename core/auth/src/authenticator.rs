//! Credential lifecycle: load, validate, refresh, re-acquire, persist.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use drivelink_common::{Error, Result};

use crate::credential::{Credential, CredentialStatus};
use crate::store::CredentialStore;

/// A flow able to mint and refresh credentials for one service.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Provider name for logs (e.g. "google", "microsoft").
    fn name(&self) -> &str;

    /// Exchange a refresh token for a new credential.
    async fn refresh(&self, refresh_token: &str) -> Result<Credential>;

    /// Run the full acquisition flow (interactive or client credentials).
    async fn acquire(&self) -> Result<Credential>;
}

/// States of the authentication flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    NoCredential,
    Loaded,
    Refreshing,
    Acquiring,
    Ready,
    Done,
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthState::NoCredential => "NO_CREDENTIAL",
            AuthState::Loaded => "LOADED",
            AuthState::Refreshing => "REFRESHING",
            AuthState::Acquiring => "ACQUIRING",
            AuthState::Ready => "READY",
            AuthState::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// Produces valid credentials, reusing stored ones when possible.
pub struct Authenticator {
    store: Arc<dyn CredentialStore>,
    provider: Arc<dyn TokenProvider>,
}

impl Authenticator {
    /// Create an authenticator over a store and a provider.
    pub fn new(store: Arc<dyn CredentialStore>, provider: Arc<dyn TokenProvider>) -> Self {
        Self { store, provider }
    }

    /// Name of the underlying provider.
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Get a valid, non-expired credential.
    ///
    /// A stored credential is used as is when valid. An expired one with a
    /// refresh token gets exactly one refresh attempt; if that fails the
    /// failure is logged and the full acquisition flow runs instead. The
    /// returned credential has always been persisted first.
    ///
    /// # Errors
    /// - `Auth` if acquisition fails or the token exchange hits a transport
    ///   failure
    /// - `Io` if the store cannot be read or written
    pub async fn get_valid_credential(&self) -> Result<Credential> {
        let provider = self.provider.name();
        let mut state = AuthState::NoCredential;
        let mut ready: Option<Credential> = None;

        if let Some(stored) = self.store.load().await? {
            state = self.transition(state, AuthState::Loaded);

            match stored.status() {
                CredentialStatus::Valid => {
                    ready = Some(stored);
                }
                CredentialStatus::Refreshable => {
                    state = self.transition(state, AuthState::Refreshing);
                    let refresh_token = stored.refresh_token.clone().unwrap_or_default();

                    match self.provider.refresh(&refresh_token).await {
                        Ok(refreshed) => {
                            info!("[{}] Access token refreshed", provider);
                            ready = Some(refreshed.inherit_refresh_token(Some(&refresh_token)));
                        }
                        Err(e) => {
                            warn!(
                                "[{}] Token refresh failed: {}. Starting a new authorization flow.",
                                provider, e
                            );
                            state = self.transition(state, AuthState::NoCredential);
                        }
                    }
                }
                CredentialStatus::Dead => {
                    debug!("[{}] Stored credential expired and cannot be refreshed", provider);
                }
            }
        }

        let credential = match ready {
            Some(credential) => credential,
            None => {
                state = self.transition(state, AuthState::Acquiring);
                let acquired = self.provider.acquire().await.map_err(|e| match e {
                    Error::Auth(_) | Error::MissingConfig(_) | Error::Config(_) => e,
                    other => Error::Auth(format!("[{}] {}", provider, other)),
                })?;
                info!("[{}] New credential acquired", provider);
                acquired
            }
        };

        state = self.transition(state, AuthState::Ready);
        self.store.save(&credential).await?;
        self.transition(state, AuthState::Done);

        Ok(credential)
    }

    /// Forget the stored credential.
    pub async fn sign_out(&self) -> Result<()> {
        self.store.clear().await?;
        info!("[{}] Stored credential removed", self.provider.name());
        Ok(())
    }

    fn transition(&self, from: AuthState, to: AuthState) -> AuthState {
        debug!("[{}] {} -> {}", self.provider.name(), from, to);
        to
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::MemoryCredentialStore;
    use chrono::Duration;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Provider with scripted outcomes and call counters.
    pub(crate) struct ScriptedProvider {
        pub refresh_ok: bool,
        pub acquire_ok: bool,
        pub refresh_calls: AtomicU32,
        pub acquire_calls: AtomicU32,
    }

    impl ScriptedProvider {
        pub(crate) fn new(refresh_ok: bool, acquire_ok: bool) -> Self {
            Self {
                refresh_ok,
                acquire_ok,
                refresh_calls: AtomicU32::new(0),
                acquire_calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl TokenProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn refresh(&self, refresh_token: &str) -> Result<Credential> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            if self.refresh_ok {
                Ok(Credential::new(
                    format!("refreshed-from-{}", refresh_token),
                    None,
                    Duration::hours(1),
                ))
            } else {
                Err(Error::Auth("invalid_grant".to_string()))
            }
        }

        async fn acquire(&self) -> Result<Credential> {
            self.acquire_calls.fetch_add(1, Ordering::SeqCst);
            if self.acquire_ok {
                Ok(Credential::new(
                    "acquired",
                    Some("new-refresh".into()),
                    Duration::hours(1),
                ))
            } else {
                Err(Error::Network("token endpoint unreachable".to_string()))
            }
        }
    }

    fn setup(
        stored: Option<Credential>,
        provider: ScriptedProvider,
    ) -> (Authenticator, Arc<MemoryCredentialStore>, Arc<ScriptedProvider>) {
        let store = Arc::new(match stored {
            Some(c) => MemoryCredentialStore::with_credential(c),
            None => MemoryCredentialStore::new(),
        });
        let provider = Arc::new(provider);
        let auth = Authenticator::new(store.clone(), provider.clone());
        (auth, store, provider)
    }

    #[tokio::test]
    async fn test_valid_stored_credential_is_reused() {
        let stored = Credential::new("cached", Some("r".into()), Duration::hours(1));
        let (auth, store, provider) =
            setup(Some(stored.clone()), ScriptedProvider::new(true, true));

        let credential = auth.get_valid_credential().await.unwrap();

        assert_eq!(credential, stored);
        assert_eq!(provider.refresh_calls.load(Ordering::SeqCst), 0);
        assert_eq!(provider.acquire_calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.load().await.unwrap().unwrap(), stored);
    }

    #[tokio::test]
    async fn test_expired_credential_refreshed_once() {
        let stored = Credential::new("old", Some("r1".into()), Duration::hours(-1));
        let (auth, store, provider) = setup(Some(stored), ScriptedProvider::new(true, true));

        let credential = auth.get_valid_credential().await.unwrap();

        assert_eq!(credential.access_token, "refreshed-from-r1");
        assert_eq!(credential.refresh_token.as_deref(), Some("r1"));
        assert_eq!(credential.status(), CredentialStatus::Valid);
        assert_eq!(provider.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.acquire_calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.load().await.unwrap().unwrap(), credential);
    }

    #[tokio::test]
    async fn test_refresh_failure_falls_back_to_acquisition() {
        let stored = Credential::new("old", Some("revoked".into()), Duration::hours(-1));
        let (auth, store, provider) = setup(Some(stored), ScriptedProvider::new(false, true));

        let credential = auth.get_valid_credential().await.unwrap();

        assert_eq!(credential.access_token, "acquired");
        assert_eq!(provider.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.acquire_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.load().await.unwrap().unwrap(), credential);
    }

    #[tokio::test]
    async fn test_no_stored_credential_goes_straight_to_acquisition() {
        let (auth, store, provider) = setup(None, ScriptedProvider::new(true, true));

        let credential = auth.get_valid_credential().await.unwrap();

        assert_eq!(credential.access_token, "acquired");
        assert_eq!(provider.refresh_calls.load(Ordering::SeqCst), 0);
        assert_eq!(provider.acquire_calls.load(Ordering::SeqCst), 1);
        assert!(store.load().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_dead_credential_skips_refresh() {
        let stored = Credential::new("old", None, Duration::hours(-1));
        let (auth, _store, provider) = setup(Some(stored), ScriptedProvider::new(true, true));

        auth.get_valid_credential().await.unwrap();

        assert_eq!(provider.refresh_calls.load(Ordering::SeqCst), 0);
        assert_eq!(provider.acquire_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_acquisition_failure_is_auth_error_and_nothing_persisted() {
        let (auth, store, _provider) = setup(None, ScriptedProvider::new(true, false));

        let err = auth.get_valid_credential().await.unwrap_err();

        assert!(matches!(err, Error::Auth(_)));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sign_out_clears_store() {
        let stored = Credential::new("cached", None, Duration::hours(1));
        let (auth, store, _provider) = setup(Some(stored), ScriptedProvider::new(true, true));
        auth.sign_out().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }
}
