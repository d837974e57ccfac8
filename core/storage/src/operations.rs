//! Folder, file and permission operations on the document store.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

use drivelink_common::{
    validate_name, Error, NewPermission, Permission, RemoteEntry, ResourceId, Result,
};
use drivelink_transfer::CancellationToken;

use crate::provider::{no_progress, DriveApi, ProgressFn};
use crate::query::FileQuery;

/// Result of one item of a batch operation.
#[derive(Debug)]
pub struct ItemOutcome {
    pub file_id: String,
    pub file_name: String,
    /// Id of the created permission, or why the item failed.
    pub result: Result<String>,
}

impl ItemOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// High-level operations over a [`DriveApi`].
///
/// Every method awaits one remote call at a time. When a by-name lookup
/// matches several entries, the first one in the order the service
/// returned wins.
pub struct DriveOperations {
    api: Arc<dyn DriveApi>,
    cancel: CancellationToken,
    progress: Arc<ProgressFn>,
}

impl DriveOperations {
    pub fn new(api: Arc<dyn DriveApi>) -> Self {
        Self {
            api,
            cancel: CancellationToken::new(),
            progress: Arc::new(no_progress),
        }
    }

    /// Cancel uploads and downloads when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Report transfer progress to `progress`.
    pub fn with_progress(mut self, progress: Arc<ProgressFn>) -> Self {
        self.progress = progress;
        self
    }

    /// Create a folder and return its id.
    ///
    /// # Errors
    /// - `Validation` if the name is empty after trimming
    pub async fn create_folder(&self, name: &str, parent_id: Option<&str>) -> Result<String> {
        let name = validate_name(name, "Folder")?;
        let folder = self.api.create_folder(name, parent_id).await?;
        Ok(folder.id)
    }

    /// Id of the first non-trashed folder named `name`, if any.
    pub async fn find_folder(&self, name: &str) -> Result<Option<String>> {
        let name = validate_name(name, "Folder")?;
        let query = FileQuery::new().named(name).folders_only().not_trashed();
        let found = self.api.search(&query).await?;
        if found.is_empty() {
            info!("No folder named '{}'", name);
        }
        Ok(found.into_iter().next().map(|f| f.id))
    }

    /// Parent ids of a folder. Empty means the folder sits at the drive root.
    pub async fn folder_parents(&self, folder_id: &str) -> Result<Vec<String>> {
        Ok(self.api.get(folder_id).await?.parent_ids)
    }

    /// Non-trashed entries directly inside a folder.
    pub async fn list_folder(&self, folder_id: &str) -> Result<Vec<RemoteEntry>> {
        let query = FileQuery::new().in_parent(folder_id).not_trashed();
        let entries = self.api.search(&query).await?;
        debug!("Folder {} holds {} entries", folder_id, entries.len());
        Ok(entries)
    }

    /// Id of the file named `name` inside a folder.
    ///
    /// # Errors
    /// - `NotFound` if nothing matches
    pub async fn find_file_in_folder(&self, folder_id: &str, name: &str) -> Result<String> {
        let name = validate_name(name, "File")?;
        let query = FileQuery::new()
            .in_parent(folder_id)
            .named(name)
            .not_trashed();
        let matches = self.api.search(&query).await?;

        if matches.len() > 1 {
            debug!(
                "{} entries named '{}' in folder {}; using the first",
                matches.len(),
                name,
                folder_id
            );
        }

        matches.into_iter().next().map(|f| f.id).ok_or_else(|| {
            Error::NotFound(format!("File '{}' not found in folder {}", name, folder_id))
        })
    }

    /// Upload a local file into a folder and return the new file's id.
    ///
    /// # Errors
    /// - `Validation` if the local file does not exist or the name is empty;
    ///   no remote call is made in that case
    pub async fn upload_file(
        &self,
        folder_id: &str,
        name: &str,
        local_path: &Path,
    ) -> Result<String> {
        let name = validate_name(name, "File")?;
        check_local_file(local_path).await?;

        let file = self
            .api
            .upload(folder_id, name, local_path, &self.cancel, self.progress.as_ref())
            .await?;
        info!("File '{}' uploaded to folder {} as {}", name, folder_id, file.id);
        Ok(file.id)
    }

    /// Content of a file.
    pub async fn download_file(&self, file_id: &str) -> Result<Vec<u8>> {
        self.api
            .download(file_id, &self.cancel, self.progress.as_ref())
            .await
    }

    /// Find a file by name in a folder and save it as `dest_dir/name`.
    pub async fn download_named_file(
        &self,
        folder_id: &str,
        name: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf> {
        let name = validate_name(name, "File")?;
        if Path::new(name).file_name().and_then(|n| n.to_str()) != Some(name) {
            return Err(Error::Validation(format!(
                "File name '{}' cannot be used as a local file name",
                name
            )));
        }

        let file_id = self.find_file_in_folder(folder_id, name).await?;
        let data = self.download_file(&file_id).await?;

        tokio::fs::create_dir_all(dest_dir).await?;
        let dest = dest_dir.join(name);
        tokio::fs::write(&dest, &data).await?;

        info!("File '{}' saved to {}", name, dest.display());
        Ok(dest)
    }

    /// Permissions of a file or folder.
    pub async fn list_permissions(&self, id: &str) -> Result<Vec<Permission>> {
        self.api.list_permissions(id).await
    }

    /// Grant a permission and return its id.
    ///
    /// # Errors
    /// - `Validation` if `resource_id` is not a well-formed id
    pub async fn set_permission(
        &self,
        resource_id: &str,
        permission: &NewPermission,
    ) -> Result<String> {
        let id = ResourceId::new(resource_id)?;
        let created = self.api.create_permission(id.as_str(), permission).await?;
        info!(
            "Permission '{}' granted on {} ({})",
            permission.role, id, created.id
        );
        Ok(created.id)
    }

    /// Grant `permission` on every entry of a folder.
    ///
    /// Items are processed one after the other; a failing item is logged and
    /// recorded, and the rest still run. Only the initial listing can fail
    /// the whole call.
    pub async fn assign_permissions_to_all_files(
        &self,
        folder_id: &str,
        permission: &NewPermission,
    ) -> Result<Vec<ItemOutcome>> {
        let entries = self.list_folder(folder_id).await?;
        if entries.is_empty() {
            info!("Folder {} is empty; no permissions assigned", folder_id);
        }

        let mut outcomes = Vec::with_capacity(entries.len());
        for entry in entries {
            let result = self
                .api
                .create_permission(&entry.id, permission)
                .await
                .map(|created| created.id);

            match &result {
                Ok(permission_id) => info!(
                    "Permission {} assigned to '{}' ({})",
                    permission_id, entry.name, entry.id
                ),
                Err(e) => error!(
                    file_id = %entry.id,
                    "Failed to assign permission to '{}': {}", entry.name, e
                ),
            }

            outcomes.push(ItemOutcome {
                file_id: entry.id,
                file_name: entry.name,
                result,
            });
        }

        Ok(outcomes)
    }

    /// Delete a folder and its contents.
    ///
    /// # Errors
    /// - `Validation` if the id names a file
    pub async fn delete_folder(&self, folder_id: &str) -> Result<()> {
        let entry = self.api.get(folder_id).await?;
        if !entry.is_folder() {
            return Err(Error::Validation(format!(
                "{} ('{}') is not a folder",
                folder_id, entry.name
            )));
        }
        self.api.delete(folder_id).await?;
        info!("Folder '{}' ({}) deleted", entry.name, folder_id);
        Ok(())
    }
}

async fn check_local_file(path: &Path) -> Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(()),
        Ok(_) => Err(Error::Validation(format!(
            "{} is not a regular file",
            path.display()
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::Validation(format!(
            "Local file {} does not exist",
            path.display()
        ))),
        Err(e) => Err(Error::Io(e)),
    }
}
