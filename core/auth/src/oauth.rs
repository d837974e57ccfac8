//! Helpers shared by the OAuth2 token providers.

use oauth2::basic::BasicTokenResponse;
use oauth2::{reqwest, TokenResponse};

use drivelink_common::{Error, Result};

use crate::credential::Credential;

/// HTTP client for token endpoints. Redirects are never followed.
pub(crate) fn http_client() -> Result<reqwest::Client> {
    reqwest::ClientBuilder::new()
        .redirect(reqwest::redirect::Policy::none())
        .user_agent(concat!("drivelink/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| Error::Auth(format!("Failed to create token HTTP client: {}", e)))
}

/// Convert a token endpoint response into a credential.
///
/// When the response does not echo the granted scopes, `requested` is
/// recorded instead.
pub(crate) fn credential_from_response(
    token: &BasicTokenResponse,
    requested: &[String],
) -> Credential {
    let scopes = token
        .scopes()
        .map(|granted| granted.iter().map(|s| s.as_str().to_string()).collect())
        .unwrap_or_else(|| requested.to_vec());

    Credential::from_expires_in(
        token.access_token().secret().clone(),
        token.refresh_token().map(|t| t.secret().clone()),
        token.expires_in(),
    )
    .with_scopes(scopes)
}
