//! Microsoft Graph (OneDrive) file access.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{header, Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use drivelink_auth::{MicrosoftClientCredentials, Session};
use drivelink_common::config::{GRAPH_BASE_PATH, GRAPH_USER};
use drivelink_common::{validate_name, Configuration, Error, Result};
use drivelink_transfer::{RetryExecutor, RetryPolicy};

use crate::http::{error_from_response, json_or_error, send, HttpSettings};

/// Graph API base URL.
pub const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";

/// Largest file the simple upload endpoint accepts.
pub const SIMPLE_UPLOAD_LIMIT: u64 = 250 * 1024 * 1024;

/// Everything but unreserved characters is escaped in a path segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Read retry used when the configuration does not override it.
pub fn default_read_retry() -> RetryPolicy {
    RetryPolicy::fixed(3, Duration::from_secs(2))
}

#[derive(Debug, Deserialize)]
struct DriveItem {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

/// Percent-encode a slash separated path, keeping the slashes.
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Files under a base folder of one user's drive.
pub struct GraphFileManager {
    http: Client,
    session: Arc<Session>,
    retry: RetryExecutor,
    drive_root: String,
    base_path: String,
}

impl GraphFileManager {
    /// Create a manager for `user` ("me" or a user id / principal name),
    /// resolving names under `base_path`.
    pub fn new(
        session: Arc<Session>,
        settings: &HttpSettings,
        user: &str,
        base_path: &str,
    ) -> Result<Self> {
        Self::with_api_base(GRAPH_API_BASE, session, settings, user, base_path)
    }

    /// Same as [`GraphFileManager::new`] against another Graph endpoint,
    /// such as a national cloud.
    pub fn with_api_base(
        api_base: &str,
        session: Arc<Session>,
        settings: &HttpSettings,
        user: &str,
        base_path: &str,
    ) -> Result<Self> {
        let user = user.trim();
        let user_segment = if user.is_empty() || user == "me" {
            "me".to_string()
        } else {
            format!("users/{}", utf8_percent_encode(user, SEGMENT))
        };

        Ok(Self {
            http: settings.build_client()?,
            session,
            retry: RetryExecutor::new(settings.retry.clone()),
            drive_root: format!(
                "{}/{}/drive/root",
                api_base.trim_end_matches('/'),
                user_segment
            ),
            base_path: base_path.trim_matches('/').to_string(),
        })
    }

    /// Authenticate with client credentials and open a manager configured by
    /// `GRAPH_USER` and `GRAPH_BASE_PATH`.
    pub async fn connect(config: &Configuration) -> Result<Self> {
        let settings = HttpSettings::from_configuration(config, default_read_retry())?;
        let authenticator = Arc::new(MicrosoftClientCredentials::authenticator(config)?);
        let session = Arc::new(Session::start(authenticator).await?);
        Self::new(
            session,
            &settings,
            config.get_or(GRAPH_USER, "me"),
            config.get_or(GRAPH_BASE_PATH, ""),
        )
    }

    /// Drive path of `name` under the base folder, percent-encoded.
    pub fn item_path(&self, name: &str) -> String {
        encode_path(&format!("{}/{}", self.base_path, name))
    }

    fn item_url(&self, name: &str) -> String {
        format!("{}:/{}", self.drive_root, self.item_path(name))
    }

    fn content_url(&self, name: &str) -> String {
        format!("{}:/{}:/content", self.drive_root, self.item_path(name))
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        Ok(request.header(header::AUTHORIZATION, self.session.bearer().await?))
    }

    /// Whether `name` exists under the base folder.
    ///
    /// # Errors
    /// - `RemoteApi` for any status other than 200 and 404
    pub async fn file_exists(&self, name: &str) -> Result<bool> {
        let name = validate_name(name, "File")?;
        let operation = format!("check {}", name);

        let request = self.authorized(self.http.get(self.item_url(name))).await?;
        let response = send(request, &operation).await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => {
                debug!("{} does not exist", name);
                Ok(false)
            }
            _ => Err(error_from_response(&operation, response).await),
        }
    }

    /// Read the content of `name`.
    ///
    /// Existence is checked first; the check and the read together run
    /// under the retry policy. A missing file is not retried.
    ///
    /// # Errors
    /// - `NotFound` if the file does not exist
    pub async fn open_file(&self, name: &str) -> Result<Vec<u8>> {
        let name = validate_name(name, "File")?;
        let operation = format!("read {}", name);
        let operation = operation.as_str();

        let data = self
            .retry
            .execute(operation, || async move {
                if !self.file_exists(name).await? {
                    return Err(Error::NotFound(format!(
                        "{}: no such file under '{}'",
                        operation, self.base_path
                    )));
                }
                self.read_content(name, operation).await
            })
            .await?;

        info!("Read {} ({} bytes)", name, data.len());
        Ok(data)
    }

    async fn read_content(&self, name: &str, operation: &str) -> Result<Vec<u8>> {
        let request = self.authorized(self.http.get(self.content_url(name))).await?;
        let mut response = send(request, operation).await?;

        // Content is served through a pre-authenticated download URL.
        if response.status().is_redirection() {
            let location = response
                .headers()
                .get(header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| {
                    Error::remote(
                        operation,
                        response.status().as_u16(),
                        None,
                        "redirect without a Location header",
                    )
                })?;
            response = send(self.http.get(location), operation).await?;
        }

        if !response.status().is_success() {
            return Err(error_from_response(operation, response).await);
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("{}: {}", operation, e)))?;
        Ok(body.to_vec())
    }

    /// Upload a local file in one request, named `name` or after the local
    /// file. Returns the item id.
    ///
    /// # Errors
    /// - `Validation` if the local file is missing or larger than the
    ///   simple upload limit
    pub async fn upload_small(&self, local_path: &Path, name: Option<&str>) -> Result<String> {
        let name = match name {
            Some(name) => validate_name(name, "File")?.to_string(),
            None => local_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    Error::Validation(format!("{} has no file name", local_path.display()))
                })?,
        };

        let meta = match tokio::fs::metadata(local_path).await {
            Ok(meta) if meta.is_file() => meta,
            _ => {
                return Err(Error::Validation(format!(
                    "Local file {} does not exist",
                    local_path.display()
                )))
            }
        };
        if meta.len() > SIMPLE_UPLOAD_LIMIT {
            return Err(Error::Validation(format!(
                "{} is {} bytes; simple upload is limited to {} bytes",
                local_path.display(),
                meta.len(),
                SIMPLE_UPLOAD_LIMIT
            )));
        }

        let data = tokio::fs::read(local_path).await?;
        let operation = format!("upload {}", name);

        let request = self
            .authorized(
                self.http
                    .put(self.content_url(&name))
                    .header(header::CONTENT_TYPE, "application/octet-stream")
                    .body(data),
            )
            .await?;
        let response = send(request, &operation).await?;
        let item: DriveItem = json_or_error(&operation, response).await?;

        info!(
            "Uploaded {} as {} ({})",
            local_path.display(),
            item.name.as_deref().unwrap_or(&name),
            item.id
        );
        Ok(item.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::{Reply, StubServer};
    use chrono::Duration as ChronoDuration;
    use drivelink_auth::Credential;
    use serde_json::json;

    fn manager(user: &str, base: &str) -> GraphFileManager {
        let session = Arc::new(Session::from_credential(Credential::new(
            "token",
            None,
            ChronoDuration::hours(1),
        )));
        GraphFileManager::new(
            session,
            &HttpSettings::new(default_read_retry()),
            user,
            base,
        )
        .unwrap()
    }

    fn stub_manager(server: &StubServer, base: &str) -> GraphFileManager {
        let session = Arc::new(Session::from_credential(Credential::new(
            "token",
            None,
            ChronoDuration::hours(1),
        )));
        let settings = HttpSettings::new(RetryPolicy::fixed(3, Duration::from_millis(10)));
        GraphFileManager::with_api_base(server.url(), session, &settings, "me", base).unwrap()
    }

    #[test]
    fn test_encode_path_keeps_slashes() {
        assert_eq!(encode_path("Docs/Q1 report.docx"), "Docs/Q1%20report.docx");
        assert_eq!(encode_path("/a//b/"), "a/b");
        assert_eq!(encode_path("ñ#?.txt"), "%C3%B1%23%3F.txt");
    }

    #[test]
    fn test_item_urls() {
        let m = manager("me", "/Shared Docs/");
        assert_eq!(m.item_path("plan.xlsx"), "Shared%20Docs/plan.xlsx");
        assert_eq!(
            m.item_url("plan.xlsx"),
            "https://graph.microsoft.com/v1.0/me/drive/root:/Shared%20Docs/plan.xlsx"
        );
        assert_eq!(
            m.content_url("plan.xlsx"),
            "https://graph.microsoft.com/v1.0/me/drive/root:/Shared%20Docs/plan.xlsx:/content"
        );
    }

    #[test]
    fn test_empty_base_path() {
        let m = manager("me", "");
        assert_eq!(m.item_path("a b.txt"), "a%20b.txt");
    }

    #[test]
    fn test_named_user() {
        let m = manager("alice@contoso.com", "");
        assert_eq!(
            m.item_url("x"),
            "https://graph.microsoft.com/v1.0/users/alice%40contoso.com/drive/root:/x"
        );
    }

    #[test]
    fn test_default_read_retry() {
        let policy = default_read_retry();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_upload_small_missing_file() {
        let m = manager("me", "");
        let dir = tempfile::TempDir::new().unwrap();
        let err = m
            .upload_small(&dir.path().join("absent.txt"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_empty_name_rejected_before_any_request() {
        let m = manager("me", "");
        assert!(matches!(m.file_exists("  ").await, Err(Error::Validation(_))));
        assert!(matches!(m.open_file("").await, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_file_exists_status_mapping() {
        let server = StubServer::start(vec![
            Reply::json(200, json!({"id": "item-1", "name": "a.txt"})),
            Reply::json(
                404,
                json!({"error": {"code": "itemNotFound", "message": "Item does not exist"}}),
            ),
            Reply::json(
                500,
                json!({"error": {"code": "generalException", "message": "Boom"}}),
            ),
        ])
        .await;
        let m = stub_manager(&server, "Docs");

        assert!(m.file_exists("a.txt").await.unwrap());
        assert!(!m.file_exists("a.txt").await.unwrap());
        match m.file_exists("a.txt").await {
            Err(Error::RemoteApi { status, code, .. }) => {
                assert_eq!(status, 500);
                assert_eq!(code.as_deref(), Some("generalException"));
            }
            other => panic!("unexpected result: {:?}", other),
        }

        let requests = server.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].method, "GET");
        assert_eq!(requests[0].path, "/me/drive/root:/Docs/a.txt");
        assert_eq!(requests[0].header("authorization"), Some("Bearer token"));
    }

    #[tokio::test]
    async fn test_open_missing_file_is_not_retried() {
        let server = StubServer::start(vec![Reply::status(404)]).await;
        let m = stub_manager(&server, "");

        let err = m.open_file("absent.txt").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(server.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_open_file_retries_transient_failure() {
        let server = StubServer::start(vec![
            Reply::status(503),
            Reply::json(200, json!({"id": "item-1"})),
            Reply::status(200).body("hello"),
        ])
        .await;
        let m = stub_manager(&server, "Docs");

        assert_eq!(m.open_file("a.txt").await.unwrap(), b"hello".to_vec());

        let requests = server.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[1].path, "/me/drive/root:/Docs/a.txt");
        assert_eq!(requests[2].path, "/me/drive/root:/Docs/a.txt:/content");
    }

    #[tokio::test]
    async fn test_open_file_gives_up_after_max_attempts() {
        let server = StubServer::start(vec![
            Reply::status(503),
            Reply::status(503),
            Reply::status(503),
            Reply::status(200).body("too late"),
        ])
        .await;
        let m = stub_manager(&server, "");

        let err = m.open_file("a.txt").await.unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert_eq!(server.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_content_redirect_is_followed_without_credentials() {
        let download = StubServer::start(vec![Reply::status(200).body("payload")]).await;
        let location = format!("{}/download/a.txt?tempauth=xyz", download.url());
        let api = StubServer::start(vec![
            Reply::json(200, json!({"id": "item-1"})),
            Reply::status(302).header("Location", &location),
        ])
        .await;
        let m = stub_manager(&api, "");

        assert_eq!(m.open_file("a.txt").await.unwrap(), b"payload".to_vec());

        let api_requests = api.requests();
        assert_eq!(api_requests.len(), 2);
        assert_eq!(api_requests[1].header("authorization"), Some("Bearer token"));

        let download_requests = download.requests();
        assert_eq!(download_requests.len(), 1);
        assert_eq!(download_requests[0].path, "/download/a.txt?tempauth=xyz");
        assert_eq!(download_requests[0].header("authorization"), None);
    }

    #[tokio::test]
    async fn test_upload_small_puts_content() {
        let server = StubServer::start(vec![Reply::json(
            201,
            json!({"id": "item-9", "name": "report.txt"}),
        )])
        .await;
        let m = stub_manager(&server, "Shared Docs");

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("report.txt");
        tokio::fs::write(&path, b"quarterly numbers").await.unwrap();

        assert_eq!(m.upload_small(&path, None).await.unwrap(), "item-9");

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "PUT");
        assert_eq!(
            requests[0].path,
            "/me/drive/root:/Shared%20Docs/report.txt:/content"
        );
        assert_eq!(requests[0].body, b"quarterly numbers".to_vec());
    }
}
