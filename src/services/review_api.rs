//! Transport seam between the run loop and a code-review host.
//!
//! One implementation talks to one project. Everything the approval core
//! needs is fetched through here, and every side effect it decides on is
//! applied through here.

use crate::error::AppError;
use crate::models::{Comment, MergeRequest, TreeEntry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

#[async_trait]
pub trait ReviewApi: Send + Sync {
    /// Project this handle is bound to, used as log context.
    fn project(&self) -> &str;

    /// Recursive tree listing at the configured ref.
    async fn list_tree(&self) -> Result<Vec<TreeEntry>, AppError>;

    /// Decoded content of a blob.
    async fn read_blob(&self, blob_id: &str) -> Result<Vec<u8>, AppError>;

    async fn list_open_merge_requests(&self) -> Result<Vec<MergeRequest>, AppError>;

    /// Old and new paths of every file the MR touches.
    async fn list_changed_paths(&self, mr_iid: i64) -> Result<Vec<String>, AppError>;

    /// Non-system comments, in any order.
    async fn list_comments(&self, mr_iid: i64) -> Result<Vec<Comment>, AppError>;

    async fn list_labels(&self, mr_iid: i64) -> Result<BTreeSet<String>, AppError>;

    /// Creation time of the MR's newest commit.
    async fn head_commit_timestamp(&self, mr_iid: i64) -> Result<DateTime<Utc>, AppError>;

    /// Username the bot acts as.
    async fn current_bot_identity(&self) -> Result<String, AppError>;

    async fn add_label(&self, mr_iid: i64, label: &str) -> Result<(), AppError>;

    async fn remove_label(&self, mr_iid: i64, label: &str) -> Result<(), AppError>;

    async fn post_comment(&self, mr_iid: i64, body: &str) -> Result<(), AppError>;
}
