//! Search predicates for the document store.
//!
//! A [`FileQuery`] is a conjunction of equality predicates. It renders to the
//! Drive `q` syntax and can also be evaluated locally, which is what the
//! in-memory drive does.

use drivelink_common::RemoteEntry;

/// MIME type the document store gives to folders.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    InParent(String),
    NameEquals(String),
    MimeEquals(String),
    NotTrashed,
}

/// Conjunction of search predicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileQuery {
    predicates: Vec<Predicate>,
}

impl FileQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries whose parents include `folder_id`.
    pub fn in_parent(mut self, folder_id: impl Into<String>) -> Self {
        self.predicates.push(Predicate::InParent(folder_id.into()));
        self
    }

    /// Entries named exactly `name`.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.predicates.push(Predicate::NameEquals(name.into()));
        self
    }

    /// Entries with the given MIME type.
    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.predicates.push(Predicate::MimeEquals(mime_type.into()));
        self
    }

    pub fn folders_only(self) -> Self {
        self.mime_type(FOLDER_MIME_TYPE)
    }

    /// Skip entries in the trash.
    pub fn not_trashed(mut self) -> Self {
        self.predicates.push(Predicate::NotTrashed);
        self
    }

    /// Render as a Drive `q` parameter.
    pub fn to_query_string(&self) -> String {
        self.predicates
            .iter()
            .map(|p| match p {
                Predicate::InParent(id) => format!("'{}' in parents", escape(id)),
                Predicate::NameEquals(name) => format!("name = '{}'", escape(name)),
                Predicate::MimeEquals(mime) => format!("mimeType = '{}'", escape(mime)),
                Predicate::NotTrashed => "trashed = false".to_string(),
            })
            .collect::<Vec<_>>()
            .join(" and ")
    }

    /// Evaluate against a locally held entry.
    pub fn matches(&self, entry: &RemoteEntry, trashed: bool) -> bool {
        self.predicates.iter().all(|p| match p {
            Predicate::InParent(id) => entry.parent_ids.iter().any(|parent| parent == id),
            Predicate::NameEquals(name) => &entry.name == name,
            Predicate::MimeEquals(mime) => entry.mime_type.as_deref() == Some(mime.as_str()),
            Predicate::NotTrashed => !trashed,
        })
    }
}

/// Escape a string literal for the `q` syntax.
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '\\' || c == '\'' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
