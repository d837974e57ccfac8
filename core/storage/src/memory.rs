//! In-memory document store for testing.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use tokio::sync::RwLock;
use uuid::Uuid;

use drivelink_common::{EntryKind, Error, NewPermission, Permission, RemoteEntry, Result};
use drivelink_transfer::{drive, CancellationToken, ChunkStatus, ChunkedTransfer};

use crate::provider::{DriveApi, ProgressFn};
use crate::query::{FileQuery, FOLDER_MIME_TYPE};

/// Id of the implicit root folder.
pub const ROOT_ID: &str = "root";

#[derive(Debug, Clone)]
struct Stored {
    entry: RemoteEntry,
    trashed: bool,
    content: Vec<u8>,
    permissions: Vec<Permission>,
}

#[derive(Debug, Default)]
struct State {
    /// Insertion order is the order searches return.
    entries: Vec<Stored>,
    failing_permissions: HashSet<String>,
    next_permission: u64,
}

impl State {
    fn find(&self, id: &str) -> Option<&Stored> {
        self.entries.iter().find(|s| s.entry.id == id)
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut Stored> {
        self.entries.iter_mut().find(|s| s.entry.id == id)
    }

    fn is_folder(&self, id: &str) -> bool {
        id == ROOT_ID || self.find(id).map(|s| s.entry.is_folder()).unwrap_or(false)
    }
}

/// Moves a buffer in fixed-size chunks, so in-memory transfers go through
/// the same progress loop as remote ones.
struct BufferTransfer {
    label: String,
    data: Vec<u8>,
    moved: usize,
    chunk_size: usize,
}

#[async_trait]
impl ChunkedTransfer for BufferTransfer {
    type Output = Vec<u8>;

    fn describe(&self) -> String {
        self.label.clone()
    }

    async fn next_chunk(&mut self) -> Result<ChunkStatus> {
        self.moved = (self.moved + self.chunk_size).min(self.data.len());
        Ok(ChunkStatus {
            bytes_transferred: self.moved as u64,
            bytes_total: Some(self.data.len() as u64),
            done: self.moved == self.data.len(),
        })
    }

    fn into_output(self: Box<Self>) -> Result<Vec<u8>> {
        Ok(self.data)
    }
}

/// In-memory document store.
///
/// Entries keep insertion order, which stands in for the remote listing
/// order. All data is lost on drop.
pub struct MemoryDrive {
    state: RwLock<State>,
    chunk_size: usize,
}

impl MemoryDrive {
    /// Create an empty drive holding only the root folder.
    pub fn new() -> Self {
        Self::with_chunk_size(64 * 1024)
    }

    /// Create an empty drive that moves content in `chunk_size` pieces.
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            state: RwLock::new(State::default()),
            chunk_size: chunk_size.max(1),
        }
    }

    fn new_id() -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// Add a file directly, bypassing the transfer loop.
    pub async fn insert_file(
        &self,
        parent_id: &str,
        name: &str,
        content: impl Into<Vec<u8>>,
    ) -> RemoteEntry {
        let content = content.into();
        let entry = RemoteEntry {
            id: Self::new_id(),
            name: name.to_string(),
            kind: EntryKind::File,
            parent_ids: vec![parent_id.to_string()],
            mime_type: Some("application/octet-stream".to_string()),
            size: Some(content.len() as u64),
        };
        self.state.write().await.entries.push(Stored {
            entry: entry.clone(),
            trashed: false,
            content,
            permissions: Vec::new(),
        });
        entry
    }

    /// Move an entry to the trash.
    pub async fn trash(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let stored = state
            .find_mut(id)
            .ok_or_else(|| Error::NotFound(format!("trash {}: no such entry", id)))?;
        stored.trashed = true;
        Ok(())
    }

    /// Make every later permission call on `id` fail with HTTP 403.
    pub async fn fail_permissions_for(&self, id: &str) {
        self.state
            .write()
            .await
            .failing_permissions
            .insert(id.to_string());
    }

    /// Stored content of a file.
    pub async fn content(&self, id: &str) -> Option<Vec<u8>> {
        self.state.read().await.find(id).map(|s| s.content.clone())
    }

    /// Whether an entry exists (trashed or not).
    pub async fn contains(&self, id: &str) -> bool {
        self.state.read().await.find(id).is_some()
    }
}

impl Default for MemoryDrive {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DriveApi for MemoryDrive {
    fn name(&self) -> &str {
        "memory"
    }

    async fn search(&self, query: &FileQuery) -> Result<Vec<RemoteEntry>> {
        let state = self.state.read().await;
        Ok(state
            .entries
            .iter()
            .filter(|s| query.matches(&s.entry, s.trashed))
            .map(|s| s.entry.clone())
            .collect())
    }

    async fn get(&self, id: &str) -> Result<RemoteEntry> {
        self.state
            .read()
            .await
            .find(id)
            .map(|s| s.entry.clone())
            .ok_or_else(|| Error::NotFound(format!("get file {}: no such entry", id)))
    }

    async fn create_folder(&self, name: &str, parent_id: Option<&str>) -> Result<RemoteEntry> {
        let mut state = self.state.write().await;
        let parent = parent_id.unwrap_or(ROOT_ID);
        if !state.is_folder(parent) {
            return Err(Error::NotFound(format!(
                "create folder {}: parent {} not found",
                name, parent
            )));
        }

        let entry = RemoteEntry {
            id: Self::new_id(),
            name: name.to_string(),
            kind: EntryKind::Folder,
            parent_ids: vec![parent.to_string()],
            mime_type: Some(FOLDER_MIME_TYPE.to_string()),
            size: None,
        };
        state.entries.push(Stored {
            entry: entry.clone(),
            trashed: false,
            content: Vec::new(),
            permissions: Vec::new(),
        });
        Ok(entry)
    }

    async fn upload(
        &self,
        parent_id: &str,
        name: &str,
        local_path: &Path,
        cancel: &CancellationToken,
        progress: &ProgressFn,
    ) -> Result<RemoteEntry> {
        if !self.state.read().await.is_folder(parent_id) {
            return Err(Error::NotFound(format!(
                "upload {}: folder {} not found",
                name, parent_id
            )));
        }

        let data = tokio::fs::read(local_path).await?;
        let transfer = BufferTransfer {
            label: format!("upload of {}", name),
            data,
            moved: 0,
            chunk_size: self.chunk_size,
        };
        let completed = drive(Box::new(transfer), cancel, |state| progress(state)).await?;

        Ok(self.insert_file(parent_id, name, completed.output).await)
    }

    async fn download(
        &self,
        file_id: &str,
        cancel: &CancellationToken,
        progress: &ProgressFn,
    ) -> Result<Vec<u8>> {
        let data = self
            .content(file_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("download {}: no such file", file_id)))?;

        let transfer = BufferTransfer {
            label: format!("download of {}", file_id),
            data,
            moved: 0,
            chunk_size: self.chunk_size,
        };
        let completed = drive(Box::new(transfer), cancel, |state| progress(state)).await?;
        Ok(completed.output)
    }

    async fn list_permissions(&self, id: &str) -> Result<Vec<Permission>> {
        self.state
            .read()
            .await
            .find(id)
            .map(|s| s.permissions.clone())
            .ok_or_else(|| Error::NotFound(format!("list permissions of {}: no such entry", id)))
    }

    async fn create_permission(&self, id: &str, permission: &NewPermission) -> Result<Permission> {
        let mut state = self.state.write().await;
        let operation = format!(
            "grant {} to {} on {}",
            permission.role, permission.grantee_type, id
        );

        if state.failing_permissions.contains(id) {
            return Err(Error::remote(
                operation,
                403,
                Some("insufficientFilePermissions".to_string()),
                "The user does not have sufficient permissions for this file.",
            ));
        }

        state.next_permission += 1;
        let created = Permission {
            id: format!("perm-{}", state.next_permission),
            role: permission.role.as_str().to_string(),
            grantee_type: permission.grantee_type.as_str().to_string(),
            email_address: permission.email_address.clone(),
        };

        let stored = state
            .find_mut(id)
            .ok_or_else(|| Error::NotFound(format!("{}: no such entry", operation)))?;
        stored.permissions.push(created.clone());
        Ok(created)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if state.find(id).is_none() {
            return Err(Error::NotFound(format!("delete {}: no such entry", id)));
        }

        // Collect the entry and everything below it.
        let mut doomed = vec![id.to_string()];
        let mut i = 0;
        while i < doomed.len() {
            let parent = doomed[i].clone();
            doomed.extend(
                state
                    .entries
                    .iter()
                    .filter(|s| s.entry.parent_ids.contains(&parent))
                    .map(|s| s.entry.id.clone()),
            );
            i += 1;
        }

        state.entries.retain(|s| !doomed.contains(&s.entry.id));
        Ok(())
    }
}
