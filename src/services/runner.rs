//! One reconciliation pass over the configured repositories.
//!
//! For every repository the ownership index is rebuilt from the `OWNERS`
//! files at the configured ref, then every open merge request is evaluated
//! and the resulting directives are applied (unless running dry).
//! Merge requests of one repository are processed concurrently, bounded by
//! `thread_pool_size`.

use crate::config::{Config, OwnersSettings};
use crate::error::AppError;
use crate::models::{collect_votes, Changeset, MergeRequest, OwnersDeclaration, TreeSnapshot};
use crate::services::approval::ApprovalReport;
use crate::services::gitlab_client::GitLabClient;
use crate::services::owners::OwnershipIndex;
use crate::services::reconciler::{self, Directive, Evaluation, ExternalObservation, Verdict};
use crate::services::review_api::ReviewApi;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;

/// Counters describing one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// MRs found fully approved.
    pub approved: usize,
    /// MRs that still need owner votes.
    pub pending: usize,
    /// MRs with an unowned change.
    pub unevaluable: usize,
    /// MRs whose data could not be fetched or whose directives failed.
    pub failed: usize,
    /// Repositories skipped because their index could not be built.
    pub skipped_repos: usize,
    /// Approval labels added.
    pub labels_added: usize,
    /// Approval labels removed.
    pub labels_removed: usize,
    /// Reports posted.
    pub comments_posted: usize,
}

impl RunSummary {
    fn merge(&mut self, other: &RunSummary) {
        self.approved += other.approved;
        self.pending += other.pending;
        self.unevaluable += other.unevaluable;
        self.failed += other.failed;
        self.skipped_repos += other.skipped_repos;
        self.labels_added += other.labels_added;
        self.labels_removed += other.labels_removed;
        self.comments_posted += other.comments_posted;
    }

    fn record(&mut self, evaluation: &Evaluation) {
        match evaluation.verdict {
            Verdict::Approved => self.approved += 1,
            Verdict::NotApproved(_) => self.pending += 1,
            Verdict::Unevaluable(_) => self.unevaluable += 1,
        }
        for directive in &evaluation.directives {
            match directive {
                Directive::AddApprovalLabel => self.labels_added += 1,
                Directive::RemoveApprovalLabel => self.labels_removed += 1,
                Directive::PostComment(_) => self.comments_posted += 1,
            }
        }
    }
}

/// Fetch every ownership declaration of the repository.
pub async fn fetch_snapshot<A: ReviewApi + ?Sized>(
    api: &A,
    settings: &OwnersSettings,
) -> Result<TreeSnapshot, AppError> {
    let tree = api.list_tree().await?;
    let declarations: Vec<OwnersDeclaration> = stream::iter(
        tree.into_iter()
            .filter(|entry| entry.is_declaration(&settings.owners_file)),
    )
    .map(|entry| async move {
        let content = api.read_blob(&entry.id).await?;
        Ok::<_, AppError>(OwnersDeclaration::new(entry.path, content))
    })
    .buffer_unordered(settings.thread_pool_size.max(1))
    .try_collect()
    .await?;

    Ok(TreeSnapshot::new(declarations))
}

/// Fetch the declarations and build the repository's ownership index.
pub async fn build_index<A: ReviewApi + ?Sized>(
    api: &A,
    settings: &OwnersSettings,
) -> Result<OwnershipIndex, AppError> {
    let snapshot = fetch_snapshot(api, settings).await?;
    let index = OwnershipIndex::build(&snapshot, settings.path_matching);
    log::debug!(
        "[{}] ownership index: {} of {} declarations loaded ({:?} matching)",
        api.project(),
        index.len(),
        snapshot.declarations.len(),
        index.matching()
    );
    Ok(index)
}

/// Apply directives in order, stopping at the first failure.
pub async fn apply_directives<A: ReviewApi + ?Sized>(
    api: &A,
    mr_iid: i64,
    directives: &[Directive],
    approval_label: &str,
) -> Result<(), AppError> {
    for directive in directives {
        match directive {
            Directive::AddApprovalLabel => api.add_label(mr_iid, approval_label).await?,
            Directive::RemoveApprovalLabel => api.remove_label(mr_iid, approval_label).await?,
            Directive::PostComment(body) => api.post_comment(mr_iid, body).await?,
        }
    }
    Ok(())
}

fn log_evaluation(project: &str, mr: &MergeRequest, evaluation: &Evaluation, dry_run: bool) {
    let ctx = format!(
        "{}[{} !{}]",
        if dry_run { "[dry-run] " } else { "" },
        project,
        mr.iid
    );

    match &evaluation.verdict {
        Verdict::Unevaluable(reason) => {
            log::info!("{} cannot evaluate: {}", ctx, reason);
            return;
        }
        Verdict::Approved if evaluation.is_noop() => {
            log::info!("{} already approved", ctx);
            return;
        }
        Verdict::NotApproved(report) if evaluation.is_noop() => {
            log::info!(
                "{} not fully approved ({} paths pending, report already posted)",
                ctx,
                report.len()
            );
            return;
        }
        _ => {}
    }

    for directive in &evaluation.directives {
        match directive {
            Directive::AddApprovalLabel => log::info!("{} approving now", ctx),
            Directive::RemoveApprovalLabel => log::info!("{} removing approval", ctx),
            Directive::PostComment(_) => log::info!("{} publishing approval report", ctx),
        }
    }

    if let Verdict::NotApproved(report) = &evaluation.verdict {
        for line in pending_lines(report) {
            log::debug!("{} {}", ctx, line);
        }
    }
}

/// One log line per still-unapproved path.
fn pending_lines(report: &ApprovalReport) -> Vec<String> {
    report
        .iter()
        .map(|(path, hint)| format!("{}: {}", path, hint))
        .collect()
}

/// Evaluate one merge request and, unless `dry_run`, apply the directives.
pub async fn reconcile_merge_request<A: ReviewApi + ?Sized>(
    api: &A,
    index: &OwnershipIndex,
    mr: &MergeRequest,
    bot_username: &str,
    settings: &OwnersSettings,
    dry_run: bool,
) -> Result<Evaluation, AppError> {
    let changeset = Changeset::new(api.list_changed_paths(mr.iid).await?);
    let head = api.head_commit_timestamp(mr.iid).await?;
    let comments = api.list_comments(mr.iid).await?;
    let labels = api.list_labels(mr.iid).await?;

    let votes = collect_votes(&comments, &settings.approval_token);
    let observation = ExternalObservation::from_snapshot(
        &comments,
        &labels,
        bot_username,
        &settings.approval_label,
    );

    let evaluation = reconciler::evaluate(index, &changeset, &votes, head, &observation);
    log_evaluation(api.project(), mr, &evaluation, dry_run);

    if !dry_run {
        apply_directives(api, mr.iid, &evaluation.directives, &settings.approval_label).await?;
    }

    Ok(evaluation)
}

/// Reconcile every open merge request of one project.
///
/// Failures are contained: a broken index skips the project, a broken merge
/// request is counted and the others proceed.
pub async fn run_project<A: ReviewApi + ?Sized>(
    api: &A,
    bot_username: &str,
    settings: &OwnersSettings,
    dry_run: bool,
) -> RunSummary {
    let mut summary = RunSummary::default();

    let index = match build_index(api, settings).await {
        Ok(index) => index,
        Err(e) => {
            log::warn!("[{}] skipping project, failed to build owners index: {}", api.project(), e);
            summary.skipped_repos += 1;
            return summary;
        }
    };

    let mrs = match api.list_open_merge_requests().await {
        Ok(mrs) => mrs,
        Err(e) => {
            log::warn!("[{}] skipping project, failed to list merge requests: {}", api.project(), e);
            summary.skipped_repos += 1;
            return summary;
        }
    };

    let index = &index;
    let results: Vec<(i64, Result<Evaluation, AppError>)> =
        stream::iter(mrs.iter().filter(|mr| mr.is_open()))
            .map(|mr| async move {
                let result =
                    reconcile_merge_request(api, index, mr, bot_username, settings, dry_run).await;
                (mr.iid, result)
            })
            .buffer_unordered(settings.thread_pool_size.max(1))
            .collect()
            .await;

    for (iid, result) in results {
        match result {
            Ok(evaluation) => summary.record(&evaluation),
            Err(e) => {
                log::warn!("[{} !{}] failed to reconcile: {}", api.project(), iid, e);
                summary.failed += 1;
            }
        }
    }

    summary
}

/// Run one pass over every configured repository.
///
/// Only failing to identify the bot user aborts the pass.
pub async fn run(client: &GitLabClient, config: &Config, dry_run: bool) -> Result<RunSummary, AppError> {
    let mut summary = RunSummary::default();

    let projects: Vec<_> = config
        .owners
        .repos
        .iter()
        .map(|repo| client.project(repo, config.owners.ref_name.clone()))
        .collect();

    let Some(first) = projects.first() else {
        log::warn!("No repositories configured");
        return Ok(summary);
    };

    // The token owner is the same for every project.
    let bot = first.current_bot_identity().await?;
    log::info!(
        "Reconciling {} repositories as {}{}",
        projects.len(),
        bot,
        if dry_run { " (dry run)" } else { "" }
    );

    for api in &projects {
        let project_summary = run_project(api, &bot, &config.owners, dry_run).await;
        summary.merge(&project_summary);
    }

    Ok(summary)
}
