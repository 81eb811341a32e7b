//! Data models for the owners bot.
//!
//! These models are the snapshots the run loop fetches from GitLab and hands
//! to the approval core. None of them perform I/O.

pub mod comment;
pub mod merge_request;
pub mod tree;

// Re-exports for convenient access
pub use comment::{collect_votes, Comment, Vote, DEFAULT_APPROVAL_TOKEN};
pub use merge_request::{Changeset, MergeRequest, MergeRequestState};
pub use tree::{EntryKind, OwnersDeclaration, TreeEntry, TreeSnapshot};
