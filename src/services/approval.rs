//! Approval evaluation of a changeset against the ownership index.
//!
//! A changed path is approved once any one of its owners (at any level of the
//! hierarchy) has voted since the head commit. Unapproved paths end up in an
//! [`ApprovalReport`] that names the closest owners, which doubles as the
//! comment body the bot posts and as the key used to avoid re-posting it.

use crate::models::{Changeset, Vote};
use crate::services::owners::{OwnerNotFound, OwnerSet, OwnershipIndex};
use chrono::{DateTime, Utc};
use serde::ser::Serialize;
use serde::Deserialize;
use serde_json::ser::PrettyFormatter;
use std::collections::{BTreeMap, BTreeSet};

/// Delimiter wrapped around the JSON report in a comment body.
pub const REPORT_FENCE: &str = "```";

/// Hint shown for an unapproved path.
pub fn approval_hint(closest: &OwnerSet) -> String {
    let names: Vec<&str> = closest.iter().map(String::as_str).collect();
    format!("needs approval from one of {{{}}}", names.join(", "))
}

/// Unapproved paths mapped to their remediation hint.
///
/// Keys are kept sorted, so equal reports always encode to identical bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApprovalReport {
    entries: BTreeMap<String, String>,
}

impl ApprovalReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, hint: impl Into<String>) {
        self.entries.insert(path.into(), hint.into());
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// An empty report means every change is approved.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Canonical JSON: sorted keys, four-space indentation.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let mut buf = Vec::new();
        let mut ser =
            serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
        self.entries.serialize(&mut ser)?;
        String::from_utf8(buf).map_err(serde::ser::Error::custom)
    }

    /// Comment body carrying this report.
    pub fn encode_comment(&self) -> serde_json::Result<String> {
        Ok(format!("{REPORT_FENCE}\n{}\n{REPORT_FENCE}", self.to_json()?))
    }

    /// Recover a report from a comment body written by [`encode_comment`].
    ///
    /// Returns `None` for anything that is not a fenced JSON string map.
    ///
    /// [`encode_comment`]: Self::encode_comment
    pub fn decode_comment(body: &str) -> Option<Self> {
        let inner = body
            .trim()
            .strip_prefix(REPORT_FENCE)?
            .strip_suffix(REPORT_FENCE)?;
        serde_json::from_str(inner.trim()).ok()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ApprovalReport {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Resolution and approval state of one changed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathApproval {
    pub path: String,
    pub owners: OwnerSet,
    pub closest_owners: OwnerSet,
    pub approved: bool,
}

/// Voters whose vote was cast at or after the head commit.
pub fn eligible_voters(votes: &[Vote], head: DateTime<Utc>) -> BTreeSet<&str> {
    votes
        .iter()
        .filter(|v| v.cast_at >= head)
        .map(|v| v.voter.as_str())
        .collect()
}

/// Resolve owners for every changed path and check them against the votes.
///
/// Fails on the first path without owners: a change nobody owns can never be
/// approved automatically.
pub fn path_approvals(
    index: &OwnershipIndex,
    changeset: &Changeset,
    votes: &[Vote],
    head: DateTime<Utc>,
) -> Result<Vec<PathApproval>, OwnerNotFound> {
    let resolved = changeset
        .paths()
        .map(|path| -> Result<_, OwnerNotFound> {
            let owners = index.all_owners(path)?;
            let closest_owners = index.closest_owners(path)?.clone();
            Ok((path, owners, closest_owners))
        })
        .collect::<Result<Vec<_>, OwnerNotFound>>()?;

    let voters = eligible_voters(votes, head);

    Ok(resolved
        .into_iter()
        .map(|(path, owners, closest_owners)| {
            let approved = owners.iter().any(|o| voters.contains(o.as_str()));
            PathApproval {
                path: path.to_string(),
                owners,
                closest_owners,
                approved,
            }
        })
        .collect())
}

/// Build the report of still-unapproved paths.
pub fn assess(
    index: &OwnershipIndex,
    changeset: &Changeset,
    votes: &[Vote],
    head: DateTime<Utc>,
) -> Result<ApprovalReport, OwnerNotFound> {
    Ok(path_approvals(index, changeset, votes, head)?
        .into_iter()
        .filter(|a| !a.approved)
        .map(|a| {
            let hint = approval_hint(&a.closest_owners);
            (a.path, hint)
        })
        .collect())
}
