//! Configuration file loading.
//!
//! The bot reads a TOML file naming the GitLab instance and the repositories
//! to reconcile. The access token itself never lives in the file: it is read
//! from the environment variable named by `gitlab.token_env`.

use crate::error::AppError;
use crate::models::DEFAULT_APPROVAL_TOKEN;
use crate::services::gitlab_client::GitLabClientConfig;
use crate::services::owners::PathMatching;
use serde::Deserialize;
use std::path::Path;

/// Config file used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "gitlab-owners.toml";

/// Default environment variable holding the access token.
pub const DEFAULT_TOKEN_ENV: &str = "GITLAB_TOKEN";

/// Label attached to fully approved merge requests.
pub const DEFAULT_APPROVAL_LABEL: &str = "approved";

/// Default worker pool size for concurrent merge request processing.
pub const DEFAULT_THREAD_POOL_SIZE: usize = 10;

/// Upper bound accepted for `gitlab.max_retries`.
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Top-level configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub gitlab: GitLabSettings,

    #[serde(default)]
    pub owners: OwnersSettings,
}

/// `[gitlab]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GitLabSettings {
    /// Base URL of the GitLab instance.
    pub url: String,

    /// Environment variable holding the personal access token.
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries for transient read failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// `[owners]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OwnersSettings {
    /// Projects to reconcile, as `group/project` paths or web URLs.
    pub repos: Vec<String>,

    /// Ref the `OWNERS` files are read from.
    pub ref_name: String,

    /// File name of ownership declarations.
    pub owners_file: String,

    /// Label reflecting full approval.
    pub approval_label: String,

    /// Comment body that counts as a vote.
    pub approval_token: String,

    pub path_matching: PathMatching,

    /// Maximum merge requests processed concurrently per repository.
    pub thread_pool_size: usize,
}

impl Default for OwnersSettings {
    fn default() -> Self {
        Self {
            repos: Vec::new(),
            ref_name: "master".to_string(),
            owners_file: "OWNERS".to_string(),
            approval_label: DEFAULT_APPROVAL_LABEL.to_string(),
            approval_token: DEFAULT_APPROVAL_TOKEN.to_string(),
            path_matching: PathMatching::default(),
            thread_pool_size: DEFAULT_THREAD_POOL_SIZE,
        }
    }
}

fn default_token_env() -> String {
    DEFAULT_TOKEN_ENV.to_string()
}

fn default_timeout_secs() -> u64 {
    GitLabClientConfig::default().timeout_secs
}

fn default_max_retries() -> u32 {
    GitLabClientConfig::default().max_retries
}

impl Config {
    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, AppError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.gitlab.url.trim().is_empty() {
            return Err(AppError::config_field("GitLab URL is empty", "gitlab.url"));
        }
        if self.gitlab.token_env.trim().is_empty() {
            return Err(AppError::config_field(
                "Token variable name is empty",
                "gitlab.token_env",
            ));
        }
        if self.gitlab.max_retries > MAX_RETRIES_LIMIT {
            return Err(AppError::config_field(
                format!("Max retries must be at most {}", MAX_RETRIES_LIMIT),
                "gitlab.max_retries",
            ));
        }
        if self.owners.thread_pool_size == 0 {
            return Err(AppError::config_field(
                "Thread pool size must be at least 1",
                "owners.thread_pool_size",
            ));
        }
        if self.owners.approval_label.trim().is_empty() {
            return Err(AppError::config_field(
                "Approval label is empty",
                "owners.approval_label",
            ));
        }
        if self.owners.approval_token.trim().is_empty() {
            return Err(AppError::config_field(
                "Approval token is empty",
                "owners.approval_token",
            ));
        }
        Ok(())
    }

    /// Client configuration with an explicit token.
    pub fn client_config_with_token(&self, token: impl Into<String>) -> GitLabClientConfig {
        GitLabClientConfig {
            base_url: self.gitlab.url.clone(),
            token: token.into(),
            timeout_secs: self.gitlab.timeout_secs,
            max_retries: self.gitlab.max_retries,
        }
    }

    /// Client configuration with the token read from the environment.
    pub fn client_config(&self) -> Result<GitLabClientConfig, AppError> {
        let token = std::env::var(&self.gitlab.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                AppError::config_field(
                    format!("Environment variable {} is not set", self.gitlab.token_env),
                    "gitlab.token_env",
                )
            })?;
        Ok(self.client_config_with_token(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FULL: &str = r#"
[gitlab]
url = "https://gitlab.example.com"
token_env = "OWNERS_BOT_TOKEN"
timeout_secs = 10

[owners]
repos = ["group/app", "https://gitlab.example.com/group/data"]
ref_name = "main"
approval_label = "lgtm"
path_matching = "textual"
thread_pool_size = 4
"#;

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_toml_str(FULL).unwrap();
        assert_eq!(config.gitlab.token_env, "OWNERS_BOT_TOKEN");
        assert_eq!(config.gitlab.timeout_secs, 10);
        assert_eq!(config.gitlab.max_retries, 2);
        assert_eq!(config.owners.repos.len(), 2);
        assert_eq!(config.owners.ref_name, "main");
        assert_eq!(config.owners.owners_file, "OWNERS");
        assert_eq!(config.owners.approval_label, "lgtm");
        assert_eq!(config.owners.approval_token, "/lgtm");
        assert_eq!(config.owners.path_matching, PathMatching::Textual);
        assert_eq!(config.owners.thread_pool_size, 4);
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_toml_str("[gitlab]\nurl = \"https://gitlab.com\"\n").unwrap();
        assert_eq!(config.gitlab.token_env, DEFAULT_TOKEN_ENV);
        assert_eq!(config.owners, OwnersSettings::default());
        assert_eq!(config.owners.path_matching, PathMatching::Segment);
    }

    #[test]
    fn test_zero_pool_size_rejected() {
        let content = "[gitlab]\nurl = \"https://gitlab.com\"\n[owners]\nthread_pool_size = 0\n";
        let err = Config::from_toml_str(content).unwrap_err();
        assert!(matches!(err, AppError::Config { field: Some(ref f), .. } if f == "owners.thread_pool_size"));
    }

    #[test]
    fn test_excessive_retries_rejected() {
        let content = "[gitlab]\nurl = \"https://gitlab.com\"\nmax_retries = 64\n";
        let err = Config::from_toml_str(content).unwrap_err();
        assert!(matches!(err, AppError::Config { field: Some(ref f), .. } if f == "gitlab.max_retries"));

        let content = "[gitlab]\nurl = \"https://gitlab.com\"\nmax_retries = 10\n";
        assert_eq!(Config::from_toml_str(content).unwrap().gitlab.max_retries, 10);
    }

    #[test]
    fn test_empty_url_rejected() {
        let err = Config::from_toml_str("[gitlab]\nurl = \"  \"\n").unwrap_err();
        assert!(matches!(err, AppError::Config { .. }));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let content = "[gitlab]\nurl = \"https://gitlab.com\"\n[owners]\nlabel = \"x\"\n";
        assert!(Config::from_toml_str(content).is_err());
    }

    #[test]
    fn test_missing_token_env() {
        let content =
            "[gitlab]\nurl = \"https://gitlab.com\"\ntoken_env = \"GITLAB_OWNERS_TEST_UNSET_TOKEN\"\n";
        let config = Config::from_toml_str(content).unwrap();
        assert!(config.client_config().is_err());
    }

    #[test]
    fn test_client_config_with_token() {
        let config = Config::from_toml_str(FULL).unwrap();
        let client = config.client_config_with_token("secret");
        assert_eq!(client.base_url, "https://gitlab.example.com");
        assert_eq!(client.token, "secret");
        assert_eq!(client.timeout_secs, 10);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.owners.repos[0], "group/app");
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/gitlab-owners.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }
}
