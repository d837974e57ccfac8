//! Common types used throughout drivelink.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::{Error, Result};

/// Shortest id the document store ever hands out.
pub const MIN_RESOURCE_ID_LEN: usize = 25;

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[-\w]{25,}").expect("static pattern"))
}

/// Validated, vendor-assigned identifier of a remote file or folder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId(String);

impl ResourceId {
    /// Create a ResourceId from a string.
    ///
    /// # Errors
    /// - Returns `Validation` if the id is shorter than 25 characters or
    ///   contains anything other than `[-A-Za-z0-9_]`.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.len() < MIN_RESOURCE_ID_LEN {
            return Err(Error::Validation(format!(
                "Resource id '{}' is too short ({} < {} characters)",
                id,
                id.len(),
                MIN_RESOURCE_ID_LEN
            )));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::Validation(format!(
                "Resource id '{}' contains invalid characters",
                id
            )));
        }
        Ok(Self(id))
    }

    /// Extract the id from a shared link such as
    /// `https://drive.google.com/file/d/<id>/view?usp=sharing`.
    ///
    /// The first run of at least 25 id characters wins.
    pub fn from_url(url: &str) -> Result<Self> {
        id_pattern()
            .find(url)
            .map(|m| Self(m.as_str().to_string()))
            .ok_or_else(|| Error::Validation(format!("No resource id found in URL: {}", url)))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ResourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Validate a user-supplied file or folder name and return it trimmed.
pub fn validate_name<'a>(name: &'a str, what: &str) -> Result<&'a str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation(format!("{} name cannot be empty", what)));
    }
    Ok(trimmed)
}

/// Whether a remote entry is a file or a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Folder,
}

/// A file or folder as listed by the remote service.
///
/// Identity is `id`; `name` is not unique within a folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub id: String,
    pub name: String,
    pub kind: EntryKind,
    /// Parent folder ids, in remote order, without duplicates.
    pub parent_ids: Vec<String>,
    pub mime_type: Option<String>,
    pub size: Option<u64>,
}

impl RemoteEntry {
    pub fn is_folder(&self) -> bool {
        self.kind == EntryKind::Folder
    }
}

/// Access level granted by a permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    Owner,
    Organizer,
    FileOrganizer,
    Writer,
    Commenter,
    Reader,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Organizer => "organizer",
            Role::FileOrganizer => "fileOrganizer",
            Role::Writer => "writer",
            Role::Commenter => "commenter",
            Role::Reader => "reader",
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "owner" => Ok(Role::Owner),
            "organizer" => Ok(Role::Organizer),
            "fileOrganizer" => Ok(Role::FileOrganizer),
            "writer" => Ok(Role::Writer),
            "commenter" => Ok(Role::Commenter),
            "reader" => Ok(Role::Reader),
            other => Err(Error::Validation(format!("Unknown role: {}", other))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who a permission applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GranteeType {
    User,
    Group,
    Domain,
    Anyone,
}

impl GranteeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GranteeType::User => "user",
            GranteeType::Group => "group",
            GranteeType::Domain => "domain",
            GranteeType::Anyone => "anyone",
        }
    }
}

impl FromStr for GranteeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(GranteeType::User),
            "group" => Ok(GranteeType::Group),
            "domain" => Ok(GranteeType::Domain),
            "anyone" => Ok(GranteeType::Anyone),
            other => Err(Error::Validation(format!("Unknown grantee type: {}", other))),
        }
    }
}

impl fmt::Display for GranteeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An existing permission record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: String,
    pub role: String,
    pub grantee_type: String,
    pub email_address: Option<String>,
}

/// A permission to be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPermission {
    pub role: Role,
    pub grantee_type: GranteeType,
    pub email_address: Option<String>,
}

impl NewPermission {
    /// Create a permission request.
    ///
    /// # Errors
    /// - `Validation` if `grantee_type` is user or group and no email is given
    pub fn new(
        role: Role,
        grantee_type: GranteeType,
        email_address: Option<String>,
    ) -> Result<Self> {
        let email_address = email_address.filter(|e| !e.trim().is_empty());
        if matches!(grantee_type, GranteeType::User | GranteeType::Group)
            && email_address.is_none()
        {
            return Err(Error::Validation(format!(
                "An email address is required for grantee type '{}'",
                grantee_type
            )));
        }
        Ok(Self {
            role,
            grantee_type,
            email_address,
        })
    }

    /// Shorthand for a link-style permission open to anyone.
    pub fn anyone(role: Role) -> Self {
        Self {
            role,
            grantee_type: GranteeType::Anyone,
            email_address: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE_ID: &str = "1zEP9whFIM2HoLzFxSsyvYGpYlkGPds-e";

    #[test]
    fn test_resource_id_creation() {
        let id = ResourceId::new(FILE_ID).unwrap();
        assert_eq!(id.as_str(), FILE_ID);
    }

    #[test]
    fn test_resource_id_too_short() {
        let err = ResourceId::new("abc123").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_resource_id_invalid_chars() {
        assert!(ResourceId::new("1zEP9whFIM2HoLzFxSsyvYGpY/../x").is_err());
    }

    #[test]
    fn test_resource_id_from_file_url() {
        let url = format!("https://drive.google.com/file/d/{}/view?usp=sharing", FILE_ID);
        assert_eq!(ResourceId::from_url(&url).unwrap().as_str(), FILE_ID);
    }

    #[test]
    fn test_resource_id_from_folder_url() {
        let url = "https://drive.google.com/drive/folders/1N_zHypYe1TL5F6lSacKlJYiEyJutopKB?usp=sharing";
        assert_eq!(
            ResourceId::from_url(url).unwrap().as_str(),
            "1N_zHypYe1TL5F6lSacKlJYiEyJutopKB"
        );
    }

    #[test]
    fn test_resource_id_from_url_without_id() {
        assert!(ResourceId::from_url("https://drive.google.com/drive/my-drive").is_err());
    }

    #[test]
    fn test_validate_name() {
        assert_eq!(validate_name("  Photos ", "Folder").unwrap(), "Photos");
        assert!(validate_name("   ", "Folder").is_err());
        assert!(validate_name("", "Folder").is_err());
    }

    #[test]
    fn test_role_and_grantee_parsing() {
        assert_eq!("writer".parse::<Role>().unwrap(), Role::Writer);
        assert_eq!("fileOrganizer".parse::<Role>().unwrap(), Role::FileOrganizer);
        assert!("admin".parse::<Role>().is_err());
        assert_eq!("anyone".parse::<GranteeType>().unwrap(), GranteeType::Anyone);
        assert!("world".parse::<GranteeType>().is_err());
    }

    #[test]
    fn test_new_permission_requires_email_for_user() {
        assert!(NewPermission::new(Role::Reader, GranteeType::User, None).is_err());
        assert!(NewPermission::new(Role::Reader, GranteeType::Group, Some(" ".into())).is_err());
        let perm =
            NewPermission::new(Role::Reader, GranteeType::User, Some("a@b.c".into())).unwrap();
        assert_eq!(perm.email_address.as_deref(), Some("a@b.c"));
        assert!(NewPermission::new(Role::Writer, GranteeType::Anyone, None).is_ok());
    }
}
