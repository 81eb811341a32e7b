//! Merge request comments and the approval votes derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical approval token a reviewer posts as a comment.
pub const DEFAULT_APPROVAL_TOKEN: &str = "/lgtm";

/// A general (non-system) comment on a merge request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Comment author's GitLab username.
    pub author_username: String,

    /// Comment content (Markdown).
    pub body: String,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Comment {
    pub fn new(
        author_username: impl Into<String>,
        body: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            author_username: author_username.into(),
            body: body.into(),
            created_at,
        }
    }

    /// Whether the comment body is exactly the approval token.
    ///
    /// Surrounding whitespace is ignored; anything else on the comment makes
    /// it an ordinary comment.
    pub fn is_vote(&self, token: &str) -> bool {
        self.body.trim() == token
    }
}

/// An approval signal from one reviewer at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub voter: String,
    pub cast_at: DateTime<Utc>,
}

impl Vote {
    pub fn new(voter: impl Into<String>, cast_at: DateTime<Utc>) -> Self {
        Self {
            voter: voter.into(),
            cast_at,
        }
    }
}

/// Extract every approval vote from a comment listing.
///
/// Staleness is not filtered here; the approval engine discards votes cast
/// before the head commit.
pub fn collect_votes(comments: &[Comment], token: &str) -> Vec<Vote> {
    comments
        .iter()
        .filter(|c| c.is_vote(token))
        .map(|c| Vote::new(c.author_username.clone(), c.created_at))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_collect_votes_only_exact_token() {
        let comments = vec![
            Comment::new("alice", "/lgtm", at(10)),
            Comment::new("bob", "/lgtm but fix the typo", at(11)),
            Comment::new("carol", "  /lgtm\n", at(12)),
            Comment::new("dave", "looks good", at(13)),
        ];

        let votes = collect_votes(&comments, DEFAULT_APPROVAL_TOKEN);
        assert_eq!(
            votes,
            vec![Vote::new("alice", at(10)), Vote::new("carol", at(12))]
        );
    }

    #[test]
    fn test_custom_token() {
        let comments = vec![
            Comment::new("alice", "/lgtm", at(10)),
            Comment::new("bob", "/approve", at(11)),
        ];
        let votes = collect_votes(&comments, "/approve");
        assert_eq!(votes, vec![Vote::new("bob", at(11))]);
    }
}
