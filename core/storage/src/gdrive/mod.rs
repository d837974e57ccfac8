//! Google Drive backend.
//!
//! - REST client for files and permissions, with paging
//! - Resumable chunked uploads and ranged downloads

pub mod client;
pub mod media;

use std::sync::Arc;

use drivelink_auth::{GoogleInstalledApp, Session};
use drivelink_common::{Configuration, Result};
use drivelink_transfer::RetryPolicy;

use crate::http::HttpSettings;

pub use client::{DriveClient, DriveFile};
pub use media::{RangedDownload, ResumableUpload};

/// Authenticate with the installed-app flow and open a Drive client.
///
/// Document store calls are not retried unless the configuration asks for
/// it.
pub async fn connect(config: &Configuration) -> Result<DriveClient> {
    let settings = HttpSettings::from_configuration(config, RetryPolicy::none())?;
    let authenticator = Arc::new(GoogleInstalledApp::authenticator(config)?);
    let session = Arc::new(Session::start(authenticator).await?);
    DriveClient::new(session, &settings)
}
