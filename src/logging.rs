//! Log output for the CLI.
//!
//! Library code logs through the `log` facade. The binary installs a
//! `tracing-subscriber` formatter, which also picks up `log` records.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the stderr subscriber.
///
/// Reads `RUST_LOG`; defaults to `info` if unset.
///
/// # Example
/// ```bash
/// RUST_LOG=gitlab_owners=debug gitlab-owners --dry-run
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
