#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

#[cfg(feature = "macros")]
mod macros;

pub use log;
use thiserror::Error;

pub const LOG_ENV: &str = "SQLREPL_LOG";

#[cfg(debug_assertions)]
const DEFAULT_LOG_LEVEL: &str = "sqlrepl=trace";
#[cfg(not(debug_assertions))]
const DEFAULT_LOG_LEVEL: &str = "sqlrepl=info";

#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    SetLogger(#[from] log::SetLoggerError),
}

/// Picks the filter directives: `SQLREPL_LOG`, then `RUST_LOG`, then the
/// build's default.
#[must_use]
pub fn filter_directives(sqlrepl_log: Option<String>, rust_log: Option<String>) -> String {
    sqlrepl_log
        .or(rust_log)
        .filter(|directives| !directives.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string())
}

/// Installs the process wide logger. Call once, before anything logs.
///
/// # Errors
///
/// * If a logger was already installed
pub fn init() -> Result<(), InitError> {
    let directives = filter_directives(
        std::env::var(LOG_ENV).ok(),
        std::env::var("RUST_LOG").ok(),
    );

    env_logger::Builder::new()
        .parse_filters(&directives)
        .format_timestamp_millis()
        .try_init()?;

    log::trace!("Logging initialized with \"{directives}\"");

    Ok(())
}
