//! Reconciliation of the computed approval state with what GitLab shows.
//!
//! The bot runs repeatedly against a stateless API, so every run must derive
//! the same side effects from the same inputs: a label is only toggled when
//! it disagrees with the verdict, and a report is only posted when no bot
//! comment since the head commit already carries it.

use crate::models::{Changeset, Comment, Vote};
use crate::services::approval::{self, ApprovalReport};
use crate::services::owners::{OwnerNotFound, OwnershipIndex};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

/// Outcome of evaluating a merge request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Every changed path has an owner vote.
    Approved,

    /// Some paths still need approval.
    NotApproved(ApprovalReport),

    /// A changed path has no owner; nothing may be changed on the MR.
    Unevaluable(OwnerNotFound),
}

impl Verdict {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }
}

/// A side effect the run loop should apply to the merge request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "body", rename_all = "snake_case")]
pub enum Directive {
    AddApprovalLabel,
    RemoveApprovalLabel,
    PostComment(String),
}

impl std::fmt::Display for Directive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AddApprovalLabel => write!(f, "add approval label"),
            Self::RemoveApprovalLabel => write!(f, "remove approval label"),
            Self::PostComment(_) => write!(f, "post approval report"),
        }
    }
}

/// State of the merge request as last seen on GitLab.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalObservation {
    /// Whether the approval label is attached.
    pub label_present: bool,

    /// Comments authored by the bot itself.
    pub bot_comments: Vec<Comment>,
}

impl ExternalObservation {
    pub fn new(label_present: bool, bot_comments: Vec<Comment>) -> Self {
        Self {
            label_present,
            bot_comments,
        }
    }

    /// Build the observation from raw MR listings.
    pub fn from_snapshot(
        comments: &[Comment],
        labels: &BTreeSet<String>,
        bot_username: &str,
        approval_label: &str,
    ) -> Self {
        Self {
            label_present: labels.contains(approval_label),
            bot_comments: comments
                .iter()
                .filter(|c| c.author_username == bot_username)
                .cloned()
                .collect(),
        }
    }

    /// Whether a bot comment posted since `head` already carries `report`.
    ///
    /// Comments that do not decode as a report simply do not match.
    pub fn has_posted(&self, report: &ApprovalReport, head: DateTime<Utc>) -> bool {
        self.bot_comments
            .iter()
            .filter(|c| c.created_at >= head)
            .filter_map(|c| ApprovalReport::decode_comment(&c.body))
            .any(|posted| &posted == report)
    }
}

/// Verdict plus the ordered side effects that bring GitLab in line with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub verdict: Verdict,
    pub directives: Vec<Directive>,
}

impl Evaluation {
    pub fn is_noop(&self) -> bool {
        self.directives.is_empty()
    }
}

/// Evaluate one merge request.
///
/// Pure: identical inputs always yield identical directives.
pub fn evaluate(
    index: &OwnershipIndex,
    changeset: &Changeset,
    votes: &[Vote],
    head: DateTime<Utc>,
    observation: &ExternalObservation,
) -> Evaluation {
    let report = match approval::assess(index, changeset, votes, head) {
        Ok(report) => report,
        Err(reason) => {
            return Evaluation {
                verdict: Verdict::Unevaluable(reason),
                directives: Vec::new(),
            }
        }
    };

    if report.is_empty() {
        let directives = if observation.label_present {
            Vec::new()
        } else {
            vec![Directive::AddApprovalLabel]
        };
        return Evaluation {
            verdict: Verdict::Approved,
            directives,
        };
    }

    let mut directives = Vec::new();
    if observation.label_present {
        directives.push(Directive::RemoveApprovalLabel);
    }
    if !observation.has_posted(&report, head) {
        match report.encode_comment() {
            Ok(body) => directives.push(Directive::PostComment(body)),
            Err(e) => log::error!("[owners] unable to encode approval report: {}", e),
        }
    }

    Evaluation {
        verdict: Verdict::NotApproved(report),
        directives,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::owners::PathMatching;
    use chrono::TimeZone;

    const BOT: &str = "owners-bot";

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn index() -> OwnershipIndex {
        OwnershipIndex::from_entries([("dir", vec!["alice"])], PathMatching::Segment)
    }

    fn pending_report() -> ApprovalReport {
        [("dir/file.txt", "needs approval from one of {alice}")]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_approved_without_label_adds_label() {
        let changes = Changeset::new(["dir/file.txt"]);
        let votes = vec![Vote::new("alice", at(200))];
        let eval = evaluate(&index(), &changes, &votes, at(100), &ExternalObservation::default());
        assert_eq!(eval.verdict, Verdict::Approved);
        assert_eq!(eval.directives, vec![Directive::AddApprovalLabel]);
    }

    #[test]
    fn test_approved_with_label_is_noop() {
        let changes = Changeset::new(["dir/file.txt"]);
        let votes = vec![Vote::new("alice", at(200))];
        let observation = ExternalObservation::new(true, Vec::new());
        let eval = evaluate(&index(), &changes, &votes, at(100), &observation);
        assert!(eval.verdict.is_approved());
        assert!(eval.is_noop());
    }

    #[test]
    fn test_unapproved_posts_report() {
        let changes = Changeset::new(["dir/file.txt"]);
        let eval = evaluate(&index(), &changes, &[], at(100), &ExternalObservation::default());
        assert_eq!(eval.verdict, Verdict::NotApproved(pending_report()));
        assert_eq!(
            eval.directives,
            vec![Directive::PostComment(pending_report().encode_comment().unwrap())]
        );
    }

    #[test]
    fn test_unchanged_report_is_not_reposted() {
        let changes = Changeset::new(["dir/file.txt"]);
        let prior = Comment::new(BOT, pending_report().encode_comment().unwrap(), at(150));
        let observation = ExternalObservation::new(false, vec![prior]);
        let eval = evaluate(&index(), &changes, &[], at(100), &observation);
        assert!(eval.is_noop());
    }

    #[test]
    fn test_unchanged_report_with_label_only_removes_label() {
        let changes = Changeset::new(["dir/file.txt"]);
        let prior = Comment::new(BOT, pending_report().encode_comment().unwrap(), at(150));
        let observation = ExternalObservation::new(true, vec![prior]);
        let eval = evaluate(&index(), &changes, &[], at(100), &observation);
        assert_eq!(eval.directives, vec![Directive::RemoveApprovalLabel]);
    }

    #[test]
    fn test_changed_report_removes_label_then_posts() {
        let changes = Changeset::new(["dir/file.txt", "dir/other.txt"]);
        let prior = Comment::new(BOT, pending_report().encode_comment().unwrap(), at(150));
        let observation = ExternalObservation::new(true, vec![prior]);
        let eval = evaluate(&index(), &changes, &[], at(100), &observation);
        assert_eq!(eval.directives.len(), 2);
        assert_eq!(eval.directives[0], Directive::RemoveApprovalLabel);
        assert!(matches!(eval.directives[1], Directive::PostComment(_)));
    }

    #[test]
    fn test_report_before_head_commit_is_stale() {
        let changes = Changeset::new(["dir/file.txt"]);
        let prior = Comment::new(BOT, pending_report().encode_comment().unwrap(), at(50));
        let observation = ExternalObservation::new(false, vec![prior]);
        let eval = evaluate(&index(), &changes, &[], at(100), &observation);
        assert_eq!(eval.directives.len(), 1);
    }

    #[test]
    fn test_malformed_prior_comment_is_skipped() {
        let changes = Changeset::new(["dir/file.txt"]);
        let observation = ExternalObservation::new(
            false,
            vec![
                Comment::new(BOT, "```\n{ broken\n```", at(150)),
                Comment::new(BOT, pending_report().encode_comment().unwrap(), at(160)),
            ],
        );
        let eval = evaluate(&index(), &changes, &[], at(100), &observation);
        assert!(eval.is_noop());
    }

    #[test]
    fn test_unowned_path_produces_no_directives() {
        let changes = Changeset::new(["dir/file.txt", "elsewhere/x"]);
        let votes = vec![Vote::new("alice", at(200))];
        for label_present in [false, true] {
            let observation = ExternalObservation::new(label_present, Vec::new());
            let eval = evaluate(&index(), &changes, &votes, at(100), &observation);
            assert!(matches!(eval.verdict, Verdict::Unevaluable(_)));
            assert!(eval.is_noop());
        }
    }

    #[test]
    fn test_evaluate_is_idempotent() {
        let changes = Changeset::new(["dir/file.txt"]);
        let observation = ExternalObservation::new(true, Vec::new());
        let first = evaluate(&index(), &changes, &[], at(100), &observation);
        let second = evaluate(&index(), &changes, &[], at(100), &observation);
        assert_eq!(first, second);
    }

    #[test]
    fn test_from_snapshot_keeps_only_bot_comments() {
        let comments = vec![
            Comment::new("alice", "/lgtm", at(10)),
            Comment::new(BOT, "```\n{}\n```", at(11)),
        ];
        let labels: BTreeSet<String> = ["approved".to_string()].into_iter().collect();
        let observation = ExternalObservation::from_snapshot(&comments, &labels, BOT, "approved");
        assert!(observation.label_present);
        assert_eq!(observation.bot_comments.len(), 1);
        assert_eq!(observation.bot_comments[0].author_username, BOT);
    }

    #[test]
    fn test_directive_serialization() {
        let json = serde_json::to_string(&Directive::AddApprovalLabel).unwrap();
        assert_eq!(json, r#"{"action":"add_approval_label"}"#);
        let json = serde_json::to_string(&Directive::PostComment("x".into())).unwrap();
        assert_eq!(json, r#"{"action":"post_comment","body":"x"}"#);
    }
}
