//! Persistent credential storage.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use drivelink_common::{Error, Result};

use crate::credential::Credential;

/// Stores the credential between process runs.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the stored credential.
    ///
    /// Returns `None` when nothing is stored or the stored record is
    /// malformed.
    ///
    /// # Errors
    /// - I/O failures other than "not found"
    async fn load(&self) -> Result<Option<Credential>>;

    /// Replace the stored credential. Readers never observe a partial write.
    async fn save(&self, credential: &Credential) -> Result<()>;

    /// Delete the stored credential. Missing state is not an error.
    async fn clear(&self) -> Result<()>;
}

/// JSON file credential store.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    /// Create a store backed by `path`. Nothing is touched until first use.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Resolve a token file name: absolute paths are used as given, relative
    /// ones land in the per-user config directory under `drivelink/`.
    pub fn in_config_dir(file_name: impl AsRef<Path>) -> Self {
        let file_name = file_name.as_ref();
        if file_name.is_absolute() {
            return Self::new(file_name);
        }
        let base = dirs::config_dir()
            .map(|d| d.join("drivelink"))
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(base.join(file_name))
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "credential".to_string());
        self.path
            .with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4()))
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Option<Credential>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No stored credential at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(Error::Io(e)),
        };

        match serde_json::from_str::<Credential>(&content) {
            Ok(credential) => Ok(Some(credential)),
            Err(e) => {
                warn!(
                    "Ignoring malformed credential file {}: {}",
                    self.path.display(),
                    e
                );
                Ok(None)
            }
        }
    }

    async fn save(&self, credential: &Credential) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_vec_pretty(credential)?;
        let temp = self.temp_path();

        fs::write(&temp, &json).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&temp, std::fs::Permissions::from_mode(0o600)).await?;
        }

        if let Err(e) = fs::rename(&temp, &self.path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(Error::Io(e));
        }

        debug!("Credential saved to {}", self.path.display());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

/// In-memory credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credential: RwLock<Option<Credential>>,
}

impl MemoryCredentialStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `credential`.
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            credential: RwLock::new(Some(credential)),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Result<Option<Credential>> {
        Ok(self.credential.read().await.clone())
    }

    async fn save(&self, credential: &Credential) -> Result<()> {
        *self.credential.write().await = Some(credential.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.credential.write().await = None;
        Ok(())
    }
}
