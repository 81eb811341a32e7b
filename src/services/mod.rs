//! Business logic services.
//!
//! `owners`, `approval` and `reconciler` form the pure approval core; they
//! operate on snapshots and never perform I/O. `review_api`, `gitlab_client`
//! and `runner` fetch those snapshots and apply the resulting directives.

pub mod approval;
pub mod gitlab_client;
pub mod owners;
pub mod reconciler;
pub mod review_api;
pub mod runner;

pub use approval::ApprovalReport;
pub use gitlab_client::{GitLabClient, GitLabClientConfig, ProjectClient};
pub use owners::{OwnerNotFound, OwnershipIndex, PathMatching};
pub use reconciler::{evaluate, Directive, Evaluation, ExternalObservation, Verdict};
pub use review_api::ReviewApi;
pub use runner::RunSummary;
