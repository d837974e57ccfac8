//! Google Drive v3 REST client.

use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use drivelink_auth::Session;
use drivelink_common::{
    EntryKind, Error, GranteeType, NewPermission, Permission, RemoteEntry, Result,
};
use drivelink_transfer::{drive, CancellationToken, RetryExecutor};

use super::media::{RangedDownload, ResumableUpload};
use crate::http::{error_from_response, expect_success, json_or_error, send, HttpSettings};
use crate::provider::{DriveApi, ProgressFn};
use crate::query::{FileQuery, FOLDER_MIME_TYPE};

/// Google Drive API base URL.
const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
/// Google Drive upload API base URL.
const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

/// File fields requested on every metadata call.
pub(crate) const FILE_FIELDS: &str = "id,name,mimeType,size,parents,trashed";
const LIST_FIELDS: &str = "nextPageToken,files(id,name,mimeType,size,parents,trashed)";
const PERMISSION_FIELDS: &str = "id,role,type,emailAddress,domain";
const PERMISSION_LIST_FIELDS: &str = "nextPageToken,permissions(id,role,type,emailAddress,domain)";
const PAGE_SIZE: &str = "1000";

/// Google Drive file metadata from API.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    /// Decimal string; absent for folders and native documents.
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub trashed: bool,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    /// Get size as u64.
    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_ref().and_then(|s| s.parse().ok())
    }

    pub fn into_entry(self) -> RemoteEntry {
        let kind = if self.is_folder() {
            EntryKind::Folder
        } else {
            EntryKind::File
        };
        let size = self.size_bytes();

        let mut parent_ids: Vec<String> = Vec::with_capacity(self.parents.len());
        for parent in self.parents {
            if !parent_ids.contains(&parent) {
                parent_ids.push(parent);
            }
        }

        RemoteEntry {
            id: self.id,
            name: self.name,
            kind,
            parent_ids,
            mime_type: Some(self.mime_type),
            size,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileListResponse {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DrivePermission {
    id: String,
    #[serde(default)]
    role: String,
    #[serde(rename = "type", default)]
    grantee_type: String,
    #[serde(default)]
    email_address: Option<String>,
    #[serde(default)]
    domain: Option<String>,
}

impl From<DrivePermission> for Permission {
    fn from(p: DrivePermission) -> Self {
        Permission {
            id: p.id,
            role: p.role,
            grantee_type: p.grantee_type,
            email_address: p.email_address.or(p.domain),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PermissionListResponse {
    #[serde(default)]
    permissions: Vec<DrivePermission>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Request body for a new permission. For the `domain` grantee type the
/// address field carries the domain name.
pub(crate) fn permission_body(permission: &NewPermission) -> serde_json::Value {
    let mut body = json!({
        "role": permission.role.as_str(),
        "type": permission.grantee_type.as_str(),
    });
    if let Some(address) = &permission.email_address {
        let field = if permission.grantee_type == GranteeType::Domain {
            "domain"
        } else {
            "emailAddress"
        };
        body[field] = json!(address);
    }
    body
}

/// Google Drive API client.
pub struct DriveClient {
    http: Client,
    session: Arc<Session>,
    retry: RetryExecutor,
    chunk_size: usize,
}

impl DriveClient {
    /// Create a new Drive client.
    pub fn new(session: Arc<Session>, settings: &HttpSettings) -> Result<Self> {
        Ok(Self {
            http: settings.build_client()?,
            session,
            retry: RetryExecutor::new(settings.retry.clone()),
            chunk_size: settings.chunk_size,
        })
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        Ok(request.header(header::AUTHORIZATION, self.session.bearer().await?))
    }

    async fn list_page(
        &self,
        q: &str,
        page_token: Option<&str>,
        operation: &str,
    ) -> Result<FileListResponse> {
        self.retry
            .execute(operation, || async move {
                let mut request = self.http.get(format!("{}/files", DRIVE_API_BASE)).query(&[
                    ("q", q),
                    ("fields", LIST_FIELDS),
                    ("pageSize", PAGE_SIZE),
                    ("spaces", "drive"),
                ]);
                if let Some(token) = page_token {
                    request = request.query(&[("pageToken", token)]);
                }
                let response = send(self.authorized(request).await?, operation).await?;
                json_or_error(operation, response).await
            })
            .await
    }

    /// Start a resumable upload session and return its URI.
    async fn start_resumable_upload(
        &self,
        parent_id: &str,
        name: &str,
        total_size: u64,
    ) -> Result<String> {
        let operation = format!("start upload of {} into {}", name, parent_id);
        let operation = operation.as_str();
        let metadata = json!({ "name": name, "parents": [parent_id] });
        let metadata = &metadata;

        self.retry
            .execute(operation, || async move {
                let request = self
                    .http
                    .post(format!("{}/files", DRIVE_UPLOAD_BASE))
                    .query(&[("uploadType", "resumable"), ("fields", FILE_FIELDS)])
                    .header("X-Upload-Content-Type", "application/octet-stream")
                    .header("X-Upload-Content-Length", total_size.to_string())
                    .json(metadata);
                let response = send(self.authorized(request).await?, operation).await?;

                if !response.status().is_success() {
                    return Err(error_from_response(operation, response).await);
                }

                response
                    .headers()
                    .get(header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
                    .ok_or_else(|| {
                        Error::Transfer(format!("{}: no upload URI in response", operation))
                    })
            })
            .await
    }
}

#[async_trait]
impl DriveApi for DriveClient {
    fn name(&self) -> &str {
        "gdrive"
    }

    async fn search(&self, query: &FileQuery) -> Result<Vec<RemoteEntry>> {
        let q = query.to_query_string();
        let operation = format!("search [{}]", q);
        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self
                .list_page(&q, page_token.as_deref(), &operation)
                .await?;
            entries.extend(page.files.into_iter().map(DriveFile::into_entry));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!("{} returned {} entries", operation, entries.len());
        Ok(entries)
    }

    async fn get(&self, id: &str) -> Result<RemoteEntry> {
        let operation = format!("get file {}", id);
        let operation = operation.as_str();

        let file: DriveFile = self
            .retry
            .execute(operation, || async move {
                let request = self
                    .http
                    .get(format!("{}/files/{}", DRIVE_API_BASE, id))
                    .query(&[("fields", FILE_FIELDS)]);
                let response = send(self.authorized(request).await?, operation).await?;
                json_or_error(operation, response).await
            })
            .await?;

        Ok(file.into_entry())
    }

    async fn create_folder(&self, name: &str, parent_id: Option<&str>) -> Result<RemoteEntry> {
        let operation = format!("create folder {}", name);
        let operation = operation.as_str();

        let mut metadata = json!({ "name": name, "mimeType": FOLDER_MIME_TYPE });
        if let Some(parent) = parent_id {
            metadata["parents"] = json!([parent]);
        }
        let metadata = &metadata;

        let file: DriveFile = self
            .retry
            .execute(operation, || async move {
                let request = self
                    .http
                    .post(format!("{}/files", DRIVE_API_BASE))
                    .query(&[("fields", FILE_FIELDS)])
                    .json(metadata);
                let response = send(self.authorized(request).await?, operation).await?;
                json_or_error(operation, response).await
            })
            .await?;

        info!("Created folder {} ({})", file.name, file.id);
        Ok(file.into_entry())
    }

    async fn upload(
        &self,
        parent_id: &str,
        name: &str,
        local_path: &Path,
        cancel: &CancellationToken,
        progress: &ProgressFn,
    ) -> Result<RemoteEntry> {
        let file = tokio::fs::File::open(local_path).await?;
        let total_size = file.metadata().await?.len();

        let session_uri = self
            .start_resumable_upload(parent_id, name, total_size)
            .await?;
        debug!("Resumable upload session opened for {}", name);

        let transfer = ResumableUpload::new(
            self.http.clone(),
            session_uri,
            file,
            total_size,
            self.chunk_size,
            name,
        );
        let completed = drive(Box::new(transfer), cancel, |state| progress(state)).await?;

        info!(
            "Uploaded {} ({} bytes in {} chunks)",
            name, completed.state.bytes_sent, completed.state.chunks
        );
        Ok(completed.output.into_entry())
    }

    async fn download(
        &self,
        file_id: &str,
        cancel: &CancellationToken,
        progress: &ProgressFn,
    ) -> Result<Vec<u8>> {
        let transfer = RangedDownload::new(
            self.http.clone(),
            self.session.clone(),
            format!("{}/files/{}", DRIVE_API_BASE, file_id),
            file_id,
            self.chunk_size,
        );
        let completed = drive(Box::new(transfer), cancel, |state| progress(state)).await?;
        Ok(completed.output)
    }

    async fn list_permissions(&self, id: &str) -> Result<Vec<Permission>> {
        let operation = format!("list permissions of {}", id);
        let operation = operation.as_str();
        let mut permissions = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let token = page_token.as_deref();
            let page: PermissionListResponse = self
                .retry
                .execute(operation, || async move {
                    let mut request = self
                        .http
                        .get(format!("{}/files/{}/permissions", DRIVE_API_BASE, id))
                        .query(&[("fields", PERMISSION_LIST_FIELDS)]);
                    if let Some(token) = token {
                        request = request.query(&[("pageToken", token)]);
                    }
                    let response = send(self.authorized(request).await?, operation).await?;
                    json_or_error(operation, response).await
                })
                .await?;

            permissions.extend(page.permissions.into_iter().map(Permission::from));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(permissions)
    }

    async fn create_permission(&self, id: &str, permission: &NewPermission) -> Result<Permission> {
        let operation = format!(
            "grant {} to {} on {}",
            permission.role, permission.grantee_type, id
        );
        let operation = operation.as_str();
        let body = permission_body(permission);
        let body = &body;

        let created: DrivePermission = self
            .retry
            .execute(operation, || async move {
                let request = self
                    .http
                    .post(format!("{}/files/{}/permissions", DRIVE_API_BASE, id))
                    .query(&[("fields", PERMISSION_FIELDS)])
                    .json(body);
                let response = send(self.authorized(request).await?, operation).await?;
                json_or_error(operation, response).await
            })
            .await?;

        Ok(created.into())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let operation = format!("delete {}", id);
        let operation = operation.as_str();

        self.retry
            .execute(operation, || async move {
                let request = self.http.delete(format!("{}/files/{}", DRIVE_API_BASE, id));
                let response = send(self.authorized(request).await?, operation).await?;
                expect_success(operation, response).await
            })
            .await
    }
}
