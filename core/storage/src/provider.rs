//! Document store API seam.

use async_trait::async_trait;
use std::path::Path;

use drivelink_common::{NewPermission, Permission, RemoteEntry, Result};
use drivelink_transfer::{CancellationToken, TransferState};

use crate::query::FileQuery;

/// Progress callback for uploads and downloads.
pub type ProgressFn = dyn Fn(&TransferState) + Send + Sync;

/// Progress callback that ignores every update.
pub fn no_progress(_: &TransferState) {}

/// Primitive calls against a Drive-like document store.
///
/// Each method is one remote exchange, or a chunked transfer for upload and
/// download. Implementations map HTTP 404 to `NotFound` and other failures
/// to `RemoteApi`; higher-level semantics live in
/// [`DriveOperations`](crate::DriveOperations).
#[async_trait]
pub trait DriveApi: Send + Sync {
    /// Backend name for logs (e.g. "gdrive", "memory").
    fn name(&self) -> &str;

    /// Every entry matching `query`, across all result pages, in remote order.
    async fn search(&self, query: &FileQuery) -> Result<Vec<RemoteEntry>>;

    /// Metadata of one entry.
    async fn get(&self, id: &str) -> Result<RemoteEntry>;

    /// Create a folder under `parent_id`, or at the root.
    async fn create_folder(&self, name: &str, parent_id: Option<&str>) -> Result<RemoteEntry>;

    /// Upload a local file into `parent_id` as `name`.
    ///
    /// # Preconditions
    /// - `local_path` exists and is a regular file
    async fn upload(
        &self,
        parent_id: &str,
        name: &str,
        local_path: &Path,
        cancel: &CancellationToken,
        progress: &ProgressFn,
    ) -> Result<RemoteEntry>;

    /// Download the content of a file.
    async fn download(
        &self,
        file_id: &str,
        cancel: &CancellationToken,
        progress: &ProgressFn,
    ) -> Result<Vec<u8>>;

    /// Permissions set on an entry.
    async fn list_permissions(&self, id: &str) -> Result<Vec<Permission>>;

    /// Add a permission to an entry.
    async fn create_permission(&self, id: &str, permission: &NewPermission) -> Result<Permission>;

    /// Delete an entry. Deleting a folder deletes its contents.
    async fn delete(&self, id: &str) -> Result<()>;
}
