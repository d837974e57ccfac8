//! Common utilities and types shared across drivelink crates.
//!
//! This crate provides the error taxonomy, the environment loader and the
//! remote resource types every other crate builds on.

pub mod config;
pub mod error;
pub mod types;

pub use config::{Configuration, EnvLoader};
pub use error::{Error, Result};
pub use types::{
    validate_name, EntryKind, GranteeType, NewPermission, Permission, RemoteEntry, ResourceId,
    Role,
};
