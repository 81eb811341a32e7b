//! GitLab owners - OWNERS-based merge request approval bot.
//!
//! Reads `OWNERS` files from each configured repository, counts `/lgtm`
//! votes cast by owners since the head commit, and keeps the `approved` label
//! and a single approval report comment in sync with the result.

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::AppError;
pub use services::runner::run;
