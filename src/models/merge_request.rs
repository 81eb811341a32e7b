//! Merge request model.

use serde::{Deserialize, Serialize};

/// State of a merge request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeRequestState {
    Opened,
    Merged,
    Closed,
}

impl From<&str> for MergeRequestState {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "merged" => Self::Merged,
            "closed" => Self::Closed,
            _ => Self::Opened,
        }
    }
}

impl std::fmt::Display for MergeRequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Opened => write!(f, "opened"),
            Self::Merged => write!(f, "merged"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// A merge request picked up for evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    /// Project-scoped MR number.
    pub iid: i64,

    /// MR title.
    pub title: String,

    /// Current state: `opened`, `merged`, `closed`.
    pub state: String,

    /// URL to MR in GitLab web UI.
    pub web_url: String,
}

impl MergeRequest {
    /// Parse the state string into an enum.
    pub fn state_enum(&self) -> MergeRequestState {
        MergeRequestState::from(self.state.as_str())
    }

    /// Check if the MR is open.
    pub fn is_open(&self) -> bool {
        self.state_enum() == MergeRequestState::Opened
    }
}

/// The set of file paths changed by one merge request.
///
/// Order carries no meaning; duplicates are collapsed on insertion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changeset {
    paths: std::collections::BTreeSet<String>,
}

impl Changeset {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}
