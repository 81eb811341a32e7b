use clap::Parser;
use gitlab_owners::config::{Config, DEFAULT_CONFIG_PATH};
use gitlab_owners::services::GitLabClient;
use gitlab_owners::AppError;
use std::path::PathBuf;
use std::process::ExitCode;

/// Keep GitLab merge request approval labels in sync with OWNERS files.
#[derive(Debug, Parser)]
#[command(name = "gitlab-owners", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Compute and log directives without applying them.
    #[arg(long)]
    dry_run: bool,

    /// Override `owners.thread_pool_size`.
    #[arg(long)]
    thread_pool_size: Option<usize>,
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let mut config = Config::load(&cli.config)?;
    if let Some(size) = cli.thread_pool_size {
        config.owners.thread_pool_size = size;
        config.validate()?;
    }

    let client = GitLabClient::new(config.client_config()?)?;
    let summary = gitlab_owners::run(&client, &config, cli.dry_run).await?;

    log::info!(
        "Done: {} approved, {} pending, {} unevaluable, {} failed, {} repos skipped \
         ({} labels added, {} removed, {} reports posted)",
        summary.approved,
        summary.pending,
        summary.unevaluable,
        summary.failed,
        summary.skipped_repos,
        summary.labels_added,
        summary.labels_removed,
        summary.comments_posted
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    gitlab_owners::logging::init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
