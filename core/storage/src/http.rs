//! HTTP plumbing shared by the Drive and Graph clients.

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

use drivelink_common::config::HTTP_TIMEOUT_SECS;
use drivelink_common::{Configuration, Error, Result};
use drivelink_transfer::{chunk_size_from_config, RetryPolicy, DEFAULT_CHUNK_SIZE};

/// Request timeout used when `DRIVELINK_HTTP_TIMEOUT_SECS` is unset.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Transport parameters of an API client.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub chunk_size: usize,
    pub retry: RetryPolicy,
}

impl HttpSettings {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry,
        }
    }

    /// Settings from configuration, starting from `retry` as the client's
    /// default policy.
    ///
    /// # Errors
    /// - `Config` if a numeric key does not parse
    pub fn from_configuration(config: &Configuration, retry: RetryPolicy) -> Result<Self> {
        let timeout = config
            .get_parsed::<u64>(HTTP_TIMEOUT_SECS)?
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout == 0 {
            return Err(Error::Config(format!("{} must be positive", HTTP_TIMEOUT_SECS)));
        }

        Ok(Self {
            timeout: Duration::from_secs(timeout),
            chunk_size: chunk_size_from_config(config)?,
            retry: retry.overridden_by(config)?,
        })
    }

    /// Build the HTTP client. Redirects are not followed: the resumable
    /// upload protocol answers 308 without a `Location`.
    pub fn build_client(&self) -> Result<Client> {
        Client::builder()
            .user_agent(concat!("drivelink/", env!("CARGO_PKG_VERSION")))
            .timeout(self.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))
    }
}

/// Send a request, mapping transport failures to `Network`.
pub(crate) async fn send(request: RequestBuilder, operation: &str) -> Result<Response> {
    request
        .send()
        .await
        .map_err(|e| Error::Network(format!("{}: {}", operation, e)))
}

/// Decode a successful JSON response or turn the failure into an error.
pub(crate) async fn json_or_error<T: DeserializeOwned>(
    operation: &str,
    response: Response,
) -> Result<T> {
    if !response.status().is_success() {
        return Err(error_from_response(operation, response).await);
    }
    response
        .json()
        .await
        .map_err(|e| Error::Serialization(format!("{}: invalid response body: {}", operation, e)))
}

/// Succeed on any 2xx, discarding the body.
pub(crate) async fn expect_success(operation: &str, response: Response) -> Result<()> {
    if response.status().is_success() {
        Ok(())
    } else {
        Err(error_from_response(operation, response).await)
    }
}

/// Convert a non-success response into an error.
pub(crate) async fn error_from_response(operation: &str, response: Response) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    error_from_body(operation, status, &body)
}

/// Map status and error body to an error. 404 becomes `NotFound`; anything
/// else keeps status, vendor code and message in `RemoteApi`.
///
/// Both services wrap failures as `{"error": {...}}`. Drive puts a numeric
/// `code`, a `status` and `errors[].reason`; Graph puts a string `code`.
pub(crate) fn error_from_body(operation: &str, status: StatusCode, body: &str) -> Error {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));

    let message = error
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("no response body")
                    .to_string()
            } else {
                trimmed.chars().take(512).collect()
            }
        });

    if status == StatusCode::NOT_FOUND {
        return Error::NotFound(format!("{}: {}", operation, message));
    }

    let code = error.and_then(|e| {
        e.get("code")
            .and_then(Value::as_str)
            .or_else(|| {
                e.get("errors")
                    .and_then(|errs| errs.get(0))
                    .and_then(|first| first.get("reason"))
                    .and_then(Value::as_str)
            })
            .or_else(|| e.get("status").and_then(Value::as_str))
            .map(str::to_string)
    });

    Error::remote(operation, status.as_u16(), code, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use drivelink_common::config::{CHUNK_SIZE, RETRY_ATTEMPTS};

    #[test]
    fn test_drive_error_body() {
        let body = r#"{"error": {"code": 403, "message": "The user does not have sufficient permissions for this file.",
            "errors": [{"reason": "insufficientFilePermissions", "domain": "global"}], "status": "PERMISSION_DENIED"}}"#;
        match error_from_body("set permission on abc", StatusCode::FORBIDDEN, body) {
            Error::RemoteApi {
                operation,
                status,
                code,
                message,
            } => {
                assert_eq!(operation, "set permission on abc");
                assert_eq!(status, 403);
                assert_eq!(code.as_deref(), Some("insufficientFilePermissions"));
                assert!(message.starts_with("The user does not have"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_graph_error_body() {
        let body = r#"{"error": {"code": "activityLimitReached", "message": "Too many requests"}}"#;
        let err = error_from_body("read report.docx", StatusCode::TOO_MANY_REQUESTS, body);
        assert_eq!(err.status(), Some(429));
        assert!(err.is_transient());
        assert!(err.to_string().contains("(activityLimitReached)"));
    }

    #[test]
    fn test_not_found_maps_to_not_found() {
        let body = r#"{"error": {"code": "itemNotFound", "message": "The resource could not be found."}}"#;
        let err = error_from_body("get file xyz", StatusCode::NOT_FOUND, body);
        assert!(matches!(err, Error::NotFound(ref m) if m.contains("get file xyz")));
    }

    #[test]
    fn test_non_json_body() {
        let err = error_from_body("list", StatusCode::BAD_GATEWAY, "<html>upstream</html>");
        match err {
            Error::RemoteApi { code, message, .. } => {
                assert!(code.is_none());
                assert_eq!(message, "<html>upstream</html>");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = error_from_body("list", StatusCode::SERVICE_UNAVAILABLE, "");
        assert!(err.to_string().contains("Service Unavailable"));
    }

    #[test]
    fn test_settings_from_configuration() {
        let config = Configuration::from_pairs([
            (HTTP_TIMEOUT_SECS, "15"),
            (CHUNK_SIZE, "300000"),
            (RETRY_ATTEMPTS, "4"),
        ]);
        let settings = HttpSettings::from_configuration(&config, RetryPolicy::none()).unwrap();
        assert_eq!(settings.timeout, Duration::from_secs(15));
        assert_eq!(settings.chunk_size, 512 * 1024);
        assert_eq!(settings.retry.max_attempts, 4);
    }

    #[test]
    fn test_settings_defaults_and_validation() {
        let settings =
            HttpSettings::from_configuration(&Configuration::default(), RetryPolicy::none())
                .unwrap();
        assert_eq!(settings, HttpSettings::new(RetryPolicy::none()));

        let zero = Configuration::from_pairs([(HTTP_TIMEOUT_SECS, "0")]);
        assert!(matches!(
            HttpSettings::from_configuration(&zero, RetryPolicy::none()),
            Err(Error::Config(_))
        ));
    }
}
