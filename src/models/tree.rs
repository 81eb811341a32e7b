//! Repository tree snapshot model.

use serde::{Deserialize, Serialize};

/// Kind of a repository tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Blob,
    Tree,
    Commit,
}

/// One entry of a recursive repository tree listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    /// Blob (or tree) SHA.
    pub id: String,

    /// File name without directories.
    pub name: String,

    /// Entry kind: `blob`, `tree` or `commit` (submodule).
    #[serde(rename = "type")]
    pub kind: EntryKind,

    /// Full path from the repository root.
    pub path: String,
}

impl TreeEntry {
    /// Whether this entry is an ownership declaration named `file_name`.
    pub fn is_declaration(&self, file_name: &str) -> bool {
        self.kind == EntryKind::Blob && self.name == file_name
    }
}

/// A fetched ownership declaration: its path and raw content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnersDeclaration {
    /// Path of the declaration file (e.g. `data/teams/OWNERS`).
    pub path: String,

    /// Raw file content as stored in the repository.
    pub content: Vec<u8>,
}

impl OwnersDeclaration {
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    /// Directory the declaration governs, in the legacy key form.
    ///
    /// Root-level declarations map to `.`.
    pub fn owned_dir(&self) -> &str {
        match self.path.rsplit_once('/') {
            Some((dir, _)) if !dir.is_empty() => dir,
            _ => ".",
        }
    }
}

/// All ownership declarations read from one repository at one ref.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeSnapshot {
    pub declarations: Vec<OwnersDeclaration>,
}

impl TreeSnapshot {
    pub fn new(declarations: Vec<OwnersDeclaration>) -> Self {
        Self { declarations }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_deserialize() {
        let json = r#"{"id":"a1b2","name":"OWNERS","type":"blob","path":"data/OWNERS","mode":"100644"}"#;
        let entry: TreeEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.kind, EntryKind::Blob);
        assert_eq!(entry.path, "data/OWNERS");
        assert!(entry.is_declaration("OWNERS"));
    }

    #[test]
    fn test_directory_named_owners_is_not_a_declaration() {
        let entry = TreeEntry {
            id: "x".into(),
            name: "OWNERS".into(),
            kind: EntryKind::Tree,
            path: "docs/OWNERS".into(),
        };
        assert!(!entry.is_declaration("OWNERS"));
    }

    #[test]
    fn test_owned_dir() {
        assert_eq!(OwnersDeclaration::new("OWNERS", "").owned_dir(), ".");
        assert_eq!(OwnersDeclaration::new("data/OWNERS", "").owned_dir(), "data");
        assert_eq!(
            OwnersDeclaration::new("data/teams/a/OWNERS", "").owned_dir(),
            "data/teams/a"
        );
    }
}
