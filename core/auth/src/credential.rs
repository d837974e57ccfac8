//! Access credential with expiration tracking.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A credential counts as expired this long before its real expiry.
pub const EXPIRY_MARGIN_MINUTES: i64 = 5;

/// Lifetime assumed when a token response carries no `expires_in`.
pub const DEFAULT_LIFETIME_SECS: i64 = 3600;

/// Access/refresh token pair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Credential {
    /// Bearer token for API requests.
    pub access_token: String,
    /// Token for obtaining a new access token, when the flow issues one.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// When the access token expires.
    #[zeroize(skip)]
    pub expires_at: DateTime<Utc>,
    /// Scopes granted with the token.
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Where a credential stands in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStatus {
    /// Usable as is.
    Valid,
    /// Expired, but carries a refresh token.
    Refreshable,
    /// Expired with no way to refresh.
    Dead,
}

impl Credential {
    /// Create a credential expiring `lifetime` from now.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        lifetime: Duration,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_at: Utc::now() + lifetime,
            scopes: Vec::new(),
        }
    }

    /// Build from an OAuth `expires_in`, falling back to one hour.
    pub fn from_expires_in(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in: Option<std::time::Duration>,
    ) -> Self {
        let lifetime = expires_in
            .and_then(|d| Duration::from_std(d).ok())
            .unwrap_or_else(|| Duration::seconds(DEFAULT_LIFETIME_SECS));
        Self::new(access_token, refresh_token, lifetime)
    }

    /// Set the granted scopes.
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Check if the access token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Expiry check against an explicit clock.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now + Duration::minutes(EXPIRY_MARGIN_MINUTES)
    }

    /// Whether a refresh token is present.
    pub fn can_refresh(&self) -> bool {
        self.refresh_token
            .as_deref()
            .map(|t| !t.is_empty())
            .unwrap_or(false)
    }

    /// Lifecycle status right now.
    pub fn status(&self) -> CredentialStatus {
        if !self.is_expired() && !self.access_token.is_empty() {
            CredentialStatus::Valid
        } else if self.can_refresh() {
            CredentialStatus::Refreshable
        } else {
            CredentialStatus::Dead
        }
    }

    /// Keep `previous` as refresh token when a refresh response omitted one.
    pub fn inherit_refresh_token(mut self, previous: Option<&str>) -> Self {
        if !self.can_refresh() {
            self.refresh_token = previous.map(str::to_string);
        }
        self
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_expiration() {
        let expired = Credential::new("test", Some("refresh".into()), Duration::hours(-1));
        assert!(expired.is_expired());

        let valid = Credential::new("test", Some("refresh".into()), Duration::hours(1));
        assert!(!valid.is_expired());
    }

    #[test]
    fn test_credential_near_expiration() {
        // Expiring in 4 minutes is inside the 5 minute margin
        let cred = Credential::new("test", None, Duration::minutes(4));
        assert!(cred.is_expired());
    }

    #[test]
    fn test_status() {
        let valid = Credential::new("a", None, Duration::hours(1));
        assert_eq!(valid.status(), CredentialStatus::Valid);

        let refreshable = Credential::new("a", Some("r".into()), Duration::hours(-1));
        assert_eq!(refreshable.status(), CredentialStatus::Refreshable);

        let dead = Credential::new("a", None, Duration::hours(-1));
        assert_eq!(dead.status(), CredentialStatus::Dead);

        let empty_refresh = Credential::new("a", Some(String::new()), Duration::hours(-1));
        assert_eq!(empty_refresh.status(), CredentialStatus::Dead);
    }

    #[test]
    fn test_default_lifetime() {
        let cred = Credential::from_expires_in("a", None, None);
        let remaining = cred.expires_at - Utc::now();
        assert!(remaining > Duration::minutes(59));
        assert!(remaining <= Duration::hours(1));
    }

    #[test]
    fn test_inherit_refresh_token() {
        let refreshed = Credential::new("new", None, Duration::hours(1));
        let merged = refreshed.inherit_refresh_token(Some("old-refresh"));
        assert_eq!(merged.refresh_token.as_deref(), Some("old-refresh"));

        let rotated = Credential::new("new", Some("rotated".into()), Duration::hours(1));
        let merged = rotated.inherit_refresh_token(Some("old-refresh"));
        assert_eq!(merged.refresh_token.as_deref(), Some("rotated"));
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let cred = Credential::new("super-secret", Some("also-secret".into()), Duration::hours(1));
        let debug = format!("{:?}", cred);
        assert!(!debug.contains("super-secret"));
        assert!(!debug.contains("also-secret"));
    }

    #[test]
    fn test_credential_serialization() {
        let cred = Credential::new("access", Some("refresh".into()), Duration::hours(1))
            .with_scopes(vec!["https://www.googleapis.com/auth/drive".into()]);
        let json = serde_json::to_string(&cred).unwrap();
        let deserialized: Credential = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, cred);
    }
}
