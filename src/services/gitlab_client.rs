//! GitLab API client.
//!
//! Provides HTTP client for GitLab API v4 with authentication, pagination and
//! retries of idempotent reads.

use crate::error::AppError;
use crate::models::{Comment, MergeRequest, TreeEntry};
use crate::services::review_api::ReviewApi;
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::Duration;

/// GitLab API client configuration.
#[derive(Debug, Clone)]
pub struct GitLabClientConfig {
    /// Base URL of the GitLab instance (e.g., `https://gitlab.com`).
    pub base_url: String,

    /// Personal access token for authentication.
    pub token: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// Number of retries for failed reads that may succeed later.
    pub max_retries: u32,
}

impl Default for GitLabClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: String::new(),
            timeout_secs: 30,
            max_retries: 2,
        }
    }
}

/// GitLab API client.
#[derive(Debug, Clone)]
pub struct GitLabClient {
    client: Client,
    config: GitLabClientConfig,
}

/// Pagination information from GitLab API response headers.
#[derive(Debug, Clone, Default)]
pub struct PaginationInfo {
    /// Next page number (if any).
    pub next_page: Option<u32>,
}

/// GitLab user from API.
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabUser {
    pub username: String,
}

/// GitLab merge request from API.
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabMergeRequest {
    pub iid: i64,
    pub title: String,
    pub state: String,
    pub web_url: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl From<GitLabMergeRequest> for MergeRequest {
    fn from(mr: GitLabMergeRequest) -> Self {
        Self {
            iid: mr.iid,
            title: mr.title,
            state: mr.state,
            web_url: mr.web_url,
        }
    }
}

/// GitLab file diff from API (`/merge_requests/:iid/diffs`).
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabFileDiff {
    pub old_path: String,
    pub new_path: String,
}

/// GitLab note/comment from API.
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabNote {
    pub body: String,
    pub author: GitLabUser,
    pub created_at: String,
    pub system: bool,
}

/// GitLab commit from API.
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabCommit {
    pub created_at: String,
}

/// GitLab repository blob from API (`/repository/blobs/:sha`).
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabBlob {
    pub encoding: String,
    pub content: String,
}

impl GitLabBlob {
    /// Decode the blob content.
    pub fn decode(&self) -> Result<Vec<u8>, AppError> {
        if self.encoding != "base64" {
            return Ok(self.content.clone().into_bytes());
        }
        let compact: String = self.content.split_whitespace().collect();
        Ok(base64::engine::general_purpose::STANDARD.decode(compact)?)
    }
}

/// Longest pause between two attempts of the same request.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Exponential backoff before retry `attempt` (1-based), capped at
/// [`MAX_RETRY_DELAY`].
pub fn retry_delay(attempt: u32) -> Duration {
    let millis = 500u64.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(millis).min(MAX_RETRY_DELAY)
}

/// Parse a GitLab timestamp (ISO 8601 with offset).
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| AppError::gitlab_api(format!("Invalid timestamp {:?}: {}", value, e)))
}

/// Reduce a project reference to its namespace path.
///
/// Accepts either `group/project` or a full web URL on the same instance.
pub fn project_path(base_url: &str, project: &str) -> String {
    let base = base_url.trim_end_matches('/');
    project
        .strip_prefix(base)
        .unwrap_or(project)
        .trim_matches('/')
        .trim_end_matches(".git")
        .to_string()
}

impl GitLabClient {
    /// Create a new GitLab client.
    pub fn new(config: GitLabClientConfig) -> Result<Self, AppError> {
        let mut headers = header::HeaderMap::new();

        // Add the private token header for authentication
        let token_value = header::HeaderValue::from_str(&config.token)
            .map_err(|_| AppError::authentication("Invalid token format"))?;
        headers.insert("PRIVATE-TOKEN", token_value);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Get the base URL for API requests.
    fn api_url(&self, path: &str) -> String {
        format!(
            "{}/api/v4{}",
            self.config.base_url.trim_end_matches('/'),
            path
        )
    }

    /// Bind this client to one project.
    pub fn project(&self, project: &str, ref_name: impl Into<String>) -> ProjectClient {
        ProjectClient {
            client: self.clone(),
            project: project_path(&self.config.base_url, project),
            ref_name: ref_name.into(),
        }
    }

    /// Parse pagination headers from response.
    fn parse_pagination(response: &Response) -> PaginationInfo {
        let headers = response.headers();

        let get_header = |name: &str| -> Option<u32> {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
        };

        PaginationInfo {
            next_page: get_header("x-next-page"),
        }
    }

    /// Handle API response errors.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: Response,
        endpoint: &str,
    ) -> Result<T, AppError> {
        let status = response.status();

        if status.is_success() {
            response
                .json::<T>()
                .await
                .map_err(|e| AppError::internal(format!("Failed to parse response: {}", e)))
        } else {
            Err(Self::error_from_response(response, endpoint).await)
        }
    }

    async fn error_from_response(response: Response, endpoint: &str) -> AppError {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return AppError::authentication("GitLab token expired or revoked");
        }

        let status_code = status.as_u16();
        let body = response.text().await.unwrap_or_default();
        let body_message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| {
                // GitLab returns errors as {"message": "..."} or {"error": "..."}
                v.get("message").or_else(|| v.get("error")).map(|m| match m.as_str() {
                    Some(s) => s.to_string(),
                    None => m.to_string(),
                })
            });

        let message = match (status, &body_message) {
            (StatusCode::FORBIDDEN, _) => "Access denied".to_string(),
            (StatusCode::NOT_FOUND, _) => "Resource not found".to_string(),
            (StatusCode::TOO_MANY_REQUESTS, _) => "Rate limit exceeded".to_string(),
            (_, Some(msg)) => msg.clone(),
            _ => format!("Request failed ({}): {}", status_code, body),
        };

        AppError::gitlab_api_full(message, status_code, endpoint)
    }

    /// GET a JSON endpoint, retrying transient failures.
    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<(T, PaginationInfo), AppError> {
        let url = self.api_url(endpoint);
        let mut attempt = 0u32;

        loop {
            let result = async {
                let response = self.client.get(&url).query(query).send().await?;
                let pagination = Self::parse_pagination(&response);
                let data = self.handle_response::<T>(response, endpoint).await?;
                Ok::<_, AppError>((data, pagination))
            }
            .await;

            match result {
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    log::warn!(
                        "[gitlab] GET {} failed ({}), retry {}/{}",
                        endpoint,
                        e,
                        attempt,
                        self.config.max_retries
                    );
                    tokio::time::sleep(retry_delay(attempt)).await;
                }
                other => return other,
            }
        }
    }

    /// Fetch all pages of a paginated endpoint.
    pub async fn get_all_pages<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, AppError> {
        let mut all_data = Vec::new();
        let mut page = 1u32;

        loop {
            let mut params = query.to_vec();
            params.push(("page", page.to_string()));
            params.push(("per_page", "100".to_string()));

            let (data, pagination): (Vec<T>, _) = self.get_json(endpoint, &params).await?;
            all_data.extend(data);

            match pagination.next_page {
                Some(next) => page = next,
                None => break,
            }
        }

        Ok(all_data)
    }

    /// Send a write request with a JSON body, expecting only a success status.
    ///
    /// Writes are never retried so a side effect is applied at most once.
    async fn send_json(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<(), AppError> {
        let url = self.api_url(endpoint);
        let response = self.client.request(method, &url).json(body).send().await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_from_response(response, endpoint).await)
        }
    }

    /// Fetch the user owning the token.
    pub async fn current_user(&self) -> Result<GitLabUser, AppError> {
        let (user, _) = self.get_json("/user", &[]).await?;
        Ok(user)
    }
}

/// A [`GitLabClient`] bound to one project and ref.
#[derive(Debug, Clone)]
pub struct ProjectClient {
    client: GitLabClient,
    project: String,
    ref_name: String,
}

impl ProjectClient {
    /// Endpoint under `/projects/:id`, with the namespace path URL-encoded.
    fn endpoint(&self, suffix: &str) -> String {
        format!("/projects/{}{}", urlencoding::encode(&self.project), suffix)
    }

    fn mr_endpoint(&self, mr_iid: i64, suffix: &str) -> String {
        self.endpoint(&format!("/merge_requests/{}{}", mr_iid, suffix))
    }
}

#[async_trait]
impl ReviewApi for ProjectClient {
    fn project(&self) -> &str {
        &self.project
    }

    async fn list_tree(&self) -> Result<Vec<TreeEntry>, AppError> {
        let query = [
            ("recursive", "true".to_string()),
            ("ref", self.ref_name.clone()),
        ];
        self.client
            .get_all_pages(&self.endpoint("/repository/tree"), &query)
            .await
    }

    async fn read_blob(&self, blob_id: &str) -> Result<Vec<u8>, AppError> {
        let endpoint = self.endpoint(&format!("/repository/blobs/{}", blob_id));
        let (blob, _): (GitLabBlob, _) = self.client.get_json(&endpoint, &[]).await?;
        blob.decode()
    }

    async fn list_open_merge_requests(&self) -> Result<Vec<MergeRequest>, AppError> {
        let query = [("state", "opened".to_string())];
        let mrs: Vec<GitLabMergeRequest> = self
            .client
            .get_all_pages(&self.endpoint("/merge_requests"), &query)
            .await?;
        Ok(mrs.into_iter().map(MergeRequest::from).collect())
    }

    async fn list_changed_paths(&self, mr_iid: i64) -> Result<Vec<String>, AppError> {
        let diffs: Vec<GitLabFileDiff> = self
            .client
            .get_all_pages(&self.mr_endpoint(mr_iid, "/diffs"), &[])
            .await?;

        let paths: BTreeSet<String> = diffs
            .into_iter()
            .flat_map(|d| [d.old_path, d.new_path])
            .collect();
        Ok(paths.into_iter().collect())
    }

    async fn list_comments(&self, mr_iid: i64) -> Result<Vec<Comment>, AppError> {
        let notes: Vec<GitLabNote> = self
            .client
            .get_all_pages(&self.mr_endpoint(mr_iid, "/notes"), &[])
            .await?;

        notes
            .into_iter()
            .filter(|n| !n.system)
            .map(|n| -> Result<Comment, AppError> {
                Ok(Comment {
                    created_at: parse_timestamp(&n.created_at)?,
                    author_username: n.author.username,
                    body: n.body,
                })
            })
            .collect()
    }

    async fn list_labels(&self, mr_iid: i64) -> Result<BTreeSet<String>, AppError> {
        let (mr, _): (GitLabMergeRequest, _) =
            self.client.get_json(&self.mr_endpoint(mr_iid, ""), &[]).await?;
        Ok(mr.labels.into_iter().collect())
    }

    async fn head_commit_timestamp(&self, mr_iid: i64) -> Result<DateTime<Utc>, AppError> {
        // Commits are listed newest first.
        let query = [("per_page", "1".to_string())];
        let (commits, _): (Vec<GitLabCommit>, _) = self
            .client
            .get_json(&self.mr_endpoint(mr_iid, "/commits"), &query)
            .await?;

        let head = commits
            .first()
            .ok_or_else(|| AppError::not_found_with_id("Commit", mr_iid.to_string()))?;
        parse_timestamp(&head.created_at)
    }

    async fn current_bot_identity(&self) -> Result<String, AppError> {
        Ok(self.client.current_user().await?.username)
    }

    async fn add_label(&self, mr_iid: i64, label: &str) -> Result<(), AppError> {
        self.client
            .send_json(
                reqwest::Method::PUT,
                &self.mr_endpoint(mr_iid, ""),
                &serde_json::json!({ "add_labels": label }),
            )
            .await
    }

    async fn remove_label(&self, mr_iid: i64, label: &str) -> Result<(), AppError> {
        self.client
            .send_json(
                reqwest::Method::PUT,
                &self.mr_endpoint(mr_iid, ""),
                &serde_json::json!({ "remove_labels": label }),
            )
            .await
    }

    async fn post_comment(&self, mr_iid: i64, body: &str) -> Result<(), AppError> {
        self.client
            .send_json(
                reqwest::Method::POST,
                &self.mr_endpoint(mr_iid, "/notes"),
                &serde_json::json!({ "body": body }),
            )
            .await
    }
}
