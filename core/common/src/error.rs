//! Common error types for drivelink.

use thiserror::Error;

/// Top-level error type for drivelink operations.
///
/// Every variant names a failure kind callers can match on; messages carry
/// the operation and resource id so a failure can be diagnosed from the log
/// line alone.
#[derive(Debug, Error)]
pub enum Error {
    /// One or more required configuration keys are absent or empty.
    #[error("Missing configuration keys: {}", .0.join(", "))]
    MissingConfig(Vec<String>),

    /// Configuration present but unusable (unreadable file, bad number, ...).
    #[error("Configuration error: {0}")]
    Config(String),

    /// A valid credential could not be obtained.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// A chunked transfer failed mid-flight.
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// The remote service answered with an error status.
    #[error("{operation} failed with status {status}{}: {message}", code_suffix(.code))]
    RemoteApi {
        operation: String,
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// Expected resource is absent.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller-supplied argument is malformed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transport-level failure (connect, timeout, broken body).
    #[error("Network error: {0}")]
    Network(String),

    /// Operation was cancelled by the caller.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_ref()
        .map(|c| format!(" ({})", c))
        .unwrap_or_default()
}

impl Error {
    /// Build a remote API error.
    pub fn remote(
        operation: impl Into<String>,
        status: u16,
        code: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::RemoteApi {
            operation: operation.into(),
            status,
            code,
            message: message.into(),
        }
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Transport failures, throttling (429) and server-side errors (5xx) are
    /// transient; everything else is a property of the request itself.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Network(_) | Error::Io(_) => true,
            Error::RemoteApi { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// HTTP status carried by a remote error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::RemoteApi { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_lists_every_key() {
        let err = Error::MissingConfig(vec!["CLIENT_ID".into(), "TENANT_ID".into()]);
        assert_eq!(
            err.to_string(),
            "Missing configuration keys: CLIENT_ID, TENANT_ID"
        );
    }

    #[test]
    fn test_remote_error_display() {
        let err = Error::remote(
            "create folder",
            403,
            Some("insufficientPermissions".into()),
            "denied",
        );
        assert_eq!(
            err.to_string(),
            "create folder failed with status 403 (insufficientPermissions): denied"
        );

        let err = Error::remote("list files", 500, None, "boom");
        assert_eq!(err.to_string(), "list files failed with status 500: boom");
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::Network("reset".into()).is_transient());
        assert!(Error::remote("x", 429, None, "").is_transient());
        assert!(Error::remote("x", 503, None, "").is_transient());
        assert!(!Error::remote("x", 400, None, "").is_transient());
        assert!(!Error::NotFound("x".into()).is_transient());
        assert!(!Error::Auth("x".into()).is_transient());
    }
}
