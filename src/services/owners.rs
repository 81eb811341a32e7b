//! Per-path ownership index built from `OWNERS` declarations.
//!
//! Every `OWNERS` file governs the directory it lives in and everything
//! below it. Lookups walk all declarations that contain a path: the union of
//! their approvers may approve the change, and the most specific declaration
//! names who should be asked.

use crate::models::TreeSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Sorted, de-duplicated set of approver usernames.
pub type OwnerSet = BTreeSet<String>;

/// How an owned directory is matched against a changed path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathMatching {
    /// Directory containment on `/`-separated segments.
    #[default]
    Segment,

    /// Plain string prefix, byte-compatible with the legacy bot.
    ///
    /// Known defect: `data/a` also matches `data/ab/x`, and the root key `.`
    /// only matches paths that start with a dot.
    Textual,
}

/// A changed path is not covered by any ownership declaration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("No owners for path {path:?}")]
pub struct OwnerNotFound {
    pub path: String,
}

impl OwnerNotFound {
    fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
        }
    }
}

/// Structure of an `OWNERS` document.
#[derive(Debug, Deserialize)]
struct OwnersFile {
    approvers: Vec<String>,
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty() && *s != ".")
}

/// Immutable mapping from owned directory to its approvers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnershipIndex {
    entries: BTreeMap<String, OwnerSet>,
    matching: PathMatching,
}

impl OwnershipIndex {
    /// Build the index from the declarations of one repository snapshot.
    ///
    /// A declaration without a parseable `approvers` list is skipped.
    pub fn build(snapshot: &TreeSnapshot, matching: PathMatching) -> Self {
        let mut index = Self {
            entries: BTreeMap::new(),
            matching,
        };

        for declaration in &snapshot.declarations {
            let parsed: OwnersFile = match serde_yaml::from_slice(&declaration.content) {
                Ok(parsed) => parsed,
                Err(e) => {
                    log::warn!(
                        "Not able to load the approvers from {:?}: {}",
                        declaration.path,
                        e
                    );
                    continue;
                }
            };
            index.insert(declaration.owned_dir(), parsed.approvers);
        }

        index
    }

    /// Build an index directly from `(directory, approvers)` pairs.
    pub fn from_entries<I, K, O>(entries: I, matching: PathMatching) -> Self
    where
        I: IntoIterator<Item = (K, O)>,
        K: AsRef<str>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        let mut index = Self {
            entries: BTreeMap::new(),
            matching,
        };
        for (dir, owners) in entries {
            index.insert(dir.as_ref(), owners);
        }
        index
    }

    fn insert<O>(&mut self, dir: &str, owners: O)
    where
        O: IntoIterator,
        O::Item: Into<String>,
    {
        let key = match self.matching {
            PathMatching::Textual => dir.to_string(),
            PathMatching::Segment => {
                let joined = segments(dir).collect::<Vec<_>>().join("/");
                if joined.is_empty() {
                    ".".to_string()
                } else {
                    joined
                }
            }
        };
        self.entries
            .entry(key)
            .or_default()
            .extend(owners.into_iter().map(Into::into));
    }

    /// Matching mode this index was built with.
    pub fn matching(&self) -> PathMatching {
        self.matching
    }

    /// Number of owned directories.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Owned directories in ascending order.
    pub fn owned_paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    fn contains(&self, key: &str, path: &str) -> bool {
        match self.matching {
            PathMatching::Textual => path.starts_with(key),
            PathMatching::Segment => {
                let mut path_segments = segments(path);
                segments(key).all(|k| path_segments.next() == Some(k))
            }
        }
    }

    fn specificity(&self, key: &str) -> usize {
        match self.matching {
            PathMatching::Textual => key.len(),
            PathMatching::Segment => segments(key).count(),
        }
    }

    /// Entries whose directory contains `path`, in ascending key order.
    fn candidates<'a>(&'a self, path: &'a str) -> impl Iterator<Item = (&'a String, &'a OwnerSet)> {
        self.entries
            .iter()
            .filter(move |(key, _)| self.contains(key, path))
    }

    /// Everyone declared anywhere above `path`.
    ///
    /// Fails when nothing matches, and also when every match declares an
    /// empty approver list, since nobody could approve the change.
    pub fn all_owners(&self, path: &str) -> Result<OwnerSet, OwnerNotFound> {
        let owners: OwnerSet = self
            .candidates(path)
            .flat_map(|(_, owners)| owners.iter().cloned())
            .collect();

        if owners.is_empty() {
            return Err(OwnerNotFound::new(path));
        }
        Ok(owners)
    }

    /// Owners of the most specific declaration containing `path`.
    ///
    /// Equally specific matches resolve to the lexicographically smallest
    /// directory.
    pub fn closest_owners(&self, path: &str) -> Result<&OwnerSet, OwnerNotFound> {
        let mut elected: Option<(usize, &OwnerSet)> = None;
        for (key, owners) in &self.entries {
            if !self.contains(key, path) {
                continue;
            }
            let specificity = self.specificity(key);
            match elected {
                Some((best, _)) if best >= specificity => {}
                _ => elected = Some((specificity, owners)),
            }
        }
        elected
            .map(|(_, owners)| owners)
            .ok_or_else(|| OwnerNotFound::new(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OwnersDeclaration;

    fn set(names: &[&str]) -> OwnerSet {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn sample(matching: PathMatching) -> OwnershipIndex {
        OwnershipIndex::from_entries(
            [
                (".", vec!["root"]),
                ("data", vec!["alice", "bob"]),
                ("data/teams", vec!["carol"]),
                ("data/teams/infra", vec!["dave", "alice"]),
            ],
            matching,
        )
    }

    #[test]
    fn test_build_skips_malformed_declarations() {
        let snapshot = TreeSnapshot::new(vec![
            OwnersDeclaration::new("OWNERS", "approvers:\n- root\n"),
            OwnersDeclaration::new("data/OWNERS", "approvers: [alice, bob]\n"),
            OwnersDeclaration::new("docs/OWNERS", "reviewers:\n- eve\n"),
            OwnersDeclaration::new("bad/OWNERS", "approvers: [unterminated\n"),
        ]);

        let index = OwnershipIndex::build(&snapshot, PathMatching::Segment);
        assert_eq!(index.matching(), PathMatching::Segment);
        assert_eq!(index.len(), 2);
        assert_eq!(index.owned_paths().collect::<Vec<_>>(), vec![".", "data"]);
        assert_eq!(index.all_owners("data/x.yml").unwrap(), set(&["alice", "bob", "root"]));
    }

    #[test]
    fn test_all_owners_unions_every_level() {
        let index = sample(PathMatching::Segment);
        assert_eq!(
            index.all_owners("data/teams/infra/cluster.yml").unwrap(),
            set(&["alice", "bob", "carol", "dave", "root"])
        );
        assert_eq!(index.all_owners("README.md").unwrap(), set(&["root"]));
    }

    #[test]
    fn test_closest_owners_picks_most_specific() {
        let index = sample(PathMatching::Segment);
        assert_eq!(
            index.closest_owners("data/teams/infra/cluster.yml").unwrap(),
            &set(&["alice", "dave"])
        );
        assert_eq!(
            index.closest_owners("data/teams/web/app.yml").unwrap(),
            &set(&["carol"])
        );
        assert_eq!(index.closest_owners("data/other.yml").unwrap(), &set(&["alice", "bob"]));
    }

    #[test]
    fn test_unmatched_path_fails_for_both_lookups() {
        let index = OwnershipIndex::from_entries([("data", vec!["alice"])], PathMatching::Segment);
        let all = index.all_owners("docs/readme.md").unwrap_err();
        let closest = index.closest_owners("docs/readme.md").unwrap_err();
        assert_eq!(all, closest);
        assert_eq!(all.path, "docs/readme.md");
    }

    #[test]
    fn test_empty_approver_list_is_not_ownership() {
        let index = OwnershipIndex::from_entries(
            [("data", Vec::<String>::new())],
            PathMatching::Segment,
        );
        assert!(index.all_owners("data/x").is_err());
        assert!(index.closest_owners("data/x").unwrap().is_empty());
    }

    #[test]
    fn test_segment_matching_respects_directory_boundaries() {
        let index = OwnershipIndex::from_entries([("data/a", vec!["alice"])], PathMatching::Segment);
        assert!(index.all_owners("data/ab/x").is_err());
        assert!(index.all_owners("data/a/x").is_ok());
    }

    #[test]
    fn test_textual_matching_reproduces_prefix_defect() {
        let index = OwnershipIndex::from_entries([("data/a", vec!["alice"])], PathMatching::Textual);
        assert_eq!(index.matching(), PathMatching::Textual);
        assert_eq!(index.all_owners("data/ab/x").unwrap(), set(&["alice"]));
    }

    #[test]
    fn test_textual_root_key_only_matches_dot_paths() {
        let index = sample(PathMatching::Textual);
        assert!(index.all_owners("README.md").is_err());
        assert_eq!(index.all_owners(".gitlab-ci.yml").unwrap(), set(&["root"]));
    }

    #[test]
    fn test_segment_keys_are_normalized() {
        let index = OwnershipIndex::from_entries(
            [("./data/", vec!["alice"]), ("data", vec!["bob"])],
            PathMatching::Segment,
        );
        assert_eq!(index.len(), 1);
        assert_eq!(index.closest_owners("data/x").unwrap(), &set(&["alice", "bob"]));
    }

    #[test]
    fn test_textual_longest_key_wins() {
        let index = OwnershipIndex::from_entries(
            [("ab", vec!["second"]), ("a", vec!["first"])],
            PathMatching::Textual,
        );
        assert_eq!(index.closest_owners("abc").unwrap(), &set(&["second"]));
        assert_eq!(index.closest_owners("ac").unwrap(), &set(&["first"]));
    }

    #[test]
    fn test_lookups_are_deterministic() {
        let index = sample(PathMatching::Segment);
        let first = index.closest_owners("data/teams/infra/x").unwrap().clone();
        for _ in 0..10 {
            assert_eq!(index.closest_owners("data/teams/infra/x").unwrap(), &first);
        }
    }
}
