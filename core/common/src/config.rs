//! Environment loading and validation.
//!
//! Values come from a snapshot of the process environment overlaid on an
//! optional `KEY=value` file. The file is parsed into the snapshot only; the
//! process environment itself is never modified.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{error, info};

use crate::{Error, Result};

/// Path to the installed-app client secrets JSON for the document store.
pub const GOOGLE_CREDENTIALS_FILE: &str = "GOOGLE_CREDENTIALS_FILE";
/// Where the document-store credential is cached.
pub const GOOGLE_TOKEN_FILE: &str = "GOOGLE_TOKEN_FILE";
/// Space separated OAuth scopes for the document store.
pub const GOOGLE_SCOPES: &str = "GOOGLE_SCOPES";
/// Graph application (client) id.
pub const CLIENT_ID: &str = "CLIENT_ID";
/// Graph application secret.
pub const CLIENT_SECRET: &str = "CLIENT_SECRET";
/// Azure directory (tenant) id.
pub const TENANT_ID: &str = "TENANT_ID";
/// Where the graph credential is cached.
pub const GRAPH_TOKEN_FILE: &str = "GRAPH_TOKEN_FILE";
/// Folder inside the graph drive that holds named files.
pub const GRAPH_BASE_PATH: &str = "GRAPH_BASE_PATH";
/// Graph user the drive belongs to (`me` when unset).
pub const GRAPH_USER: &str = "GRAPH_USER";
/// Transport timeout in seconds.
pub const HTTP_TIMEOUT_SECS: &str = "DRIVELINK_HTTP_TIMEOUT_SECS";
/// Retry attempt override.
pub const RETRY_ATTEMPTS: &str = "DRIVELINK_RETRY_ATTEMPTS";
/// Retry delay override in milliseconds.
pub const RETRY_DELAY_MS: &str = "DRIVELINK_RETRY_DELAY_MS";
/// Transfer chunk size override in bytes.
pub const CHUNK_SIZE: &str = "DRIVELINK_CHUNK_SIZE";

/// Keys the document-store tools cannot run without.
pub const DRIVE_REQUIRED_KEYS: &[&str] = &[GOOGLE_CREDENTIALS_FILE];
/// Keys the graph tools cannot run without.
pub const GRAPH_REQUIRED_KEYS: &[&str] = &[CLIENT_ID, CLIENT_SECRET, TENANT_ID];

const MASK: &str = "****";

/// Whether a key holds a secret that must never be logged in cleartext.
pub fn is_secret_key(key: &str) -> bool {
    let upper = key.to_ascii_uppercase();
    ["SECRET", "TOKEN", "PASSWORD"]
        .iter()
        .any(|marker| upper.contains(marker))
}

/// Validated configuration values.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Configuration {
    values: BTreeMap<String, String>,
}

impl Configuration {
    /// Build a configuration directly from pairs, without validation.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Get a value; empty values read as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Get a value or fail with `MissingConfig`.
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| Error::MissingConfig(vec![key.to_string()]))
    }

    /// Get a value or a default.
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Parse an optional value.
    ///
    /// # Errors
    /// - `Config` naming the key if the value does not parse
    pub fn get_parsed<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw.parse::<T>().map(Some).map_err(|e| {
                Error::Config(format!("Invalid value for {}: {}", key, e))
            }),
        }
    }

    /// Value suitable for trace output (secrets masked).
    pub fn display_value(&self, key: &str) -> String {
        match self.get(key) {
            None => "<unset>".to_string(),
            Some(_) if is_secret_key(key) => MASK.to_string(),
            Some(v) => v.to_string(),
        }
    }

    /// Keys present in this configuration.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.values.keys().map(|k| (k, self.display_value(k))))
            .finish()
    }
}

/// Reads configuration from the environment and an optional dotenv file.
#[derive(Clone, Default)]
pub struct EnvLoader {
    env: BTreeMap<String, String>,
    dotenv_path: Option<PathBuf>,
}

impl fmt::Debug for EnvLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvLoader")
            .field("variables", &self.env.len())
            .field("dotenv_path", &self.dotenv_path)
            .finish()
    }
}

impl EnvLoader {
    /// Snapshot the current process environment.
    pub fn from_process() -> Self {
        Self {
            env: std::env::vars().collect(),
            dotenv_path: None,
        }
    }

    /// Use an explicit set of variables instead of the process environment.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            env: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            dotenv_path: None,
        }
    }

    /// Also read `KEY=value` pairs from a file. Environment values win.
    pub fn with_dotenv_file(mut self, path: impl AsRef<Path>) -> Self {
        self.dotenv_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Load configuration and validate the required keys.
    ///
    /// # Errors
    /// - `MissingConfig` listing every required key that is absent or empty,
    ///   in the order given
    /// - `Config` if the dotenv file is missing or malformed
    pub fn load(&self, required_keys: &[&str]) -> Result<Configuration> {
        let mut values = match &self.dotenv_path {
            Some(path) => read_dotenv(path)?,
            None => BTreeMap::new(),
        };
        values.extend(
            self.env
                .iter()
                .filter(|(_, v)| !v.trim().is_empty())
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        let config = Configuration { values };

        let missing: Vec<String> = required_keys
            .iter()
            .filter(|key| config.get(key).is_none())
            .map(|key| key.to_string())
            .collect();

        if !missing.is_empty() {
            error!(
                "Missing configuration keys: {}. Define them in the environment or the env file.",
                missing.join(", ")
            );
            return Err(Error::MissingConfig(missing));
        }

        info!("Configuration validated");
        for key in required_keys {
            info!("{}: {}", key, config.display_value(key));
        }

        Ok(config)
    }
}

fn read_dotenv(path: &Path) -> Result<BTreeMap<String, String>> {
    if !path.exists() {
        error!("Env file not found: {}", path.display());
        return Err(Error::Config(format!(
            "Env file not found: {}",
            path.display()
        )));
    }

    let iter = dotenvy::from_path_iter(path).map_err(|e| {
        Error::Config(format!("Failed to read env file {}: {}", path.display(), e))
    })?;

    let mut values = BTreeMap::new();
    for item in iter {
        let (key, value) = item.map_err(|e| {
            Error::Config(format!("Malformed env file {}: {}", path.display(), e))
        })?;
        values.insert(key, value);
    }

    info!("Loaded env file: {}", path.display());
    Ok(values)
}
