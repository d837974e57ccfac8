//! Credential acquisition and persistence for Google Drive and Microsoft
//! Graph.
//!
//! An [`Authenticator`] pairs a [`CredentialStore`] with a [`TokenProvider`]
//! and hands out credentials that are valid when returned; a [`Session`]
//! keeps one alive for the lifetime of an API client.

pub mod authenticator;
pub mod credential;
pub mod google;
pub mod microsoft;
mod oauth;
pub mod session;
pub mod store;

pub use authenticator::{AuthState, Authenticator, TokenProvider};
pub use credential::{Credential, CredentialStatus};
pub use google::{ClientSecrets, GoogleAuthConfig, GoogleInstalledApp};
pub use microsoft::{MicrosoftAuthConfig, MicrosoftClientCredentials};
pub use session::Session;
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
