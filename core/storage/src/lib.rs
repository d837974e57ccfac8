//! Remote storage access for drivelink.
//!
//! This crate provides a trait-based seam over a Drive-like document store,
//! with a Google Drive client and an in-memory implementation, the folder,
//! file and permission operations built on it, and a Microsoft Graph file
//! manager.
//!
//! # Design Principles
//! - One remote call at a time; batch operations run items in order
//! - Transfers are chunked and go through the shared progress loop
//! - HTTP 404 is `NotFound`; other failures keep status and vendor code

pub mod gdrive;
pub mod graph;
pub mod http;
pub mod memory;
pub mod operations;
pub mod provider;
pub mod query;

#[cfg(test)]
mod stub;

pub use gdrive::DriveClient;
pub use graph::GraphFileManager;
pub use http::HttpSettings;
pub use memory::MemoryDrive;
pub use operations::{DriveOperations, ItemOutcome};
pub use provider::{no_progress, DriveApi, ProgressFn};
pub use query::FileQuery;
