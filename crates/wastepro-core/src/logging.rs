//! Logging bootstrap.
//!
//! Installs a `tracing` subscriber configured from the `[logging]` table.
//! Safe to call more than once; later calls are no-ops.

use std::fs::OpenOptions;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Environment variable carrying the logger handle, exported for external
/// collaborators launched by the bootstrap.
pub const LOGGER_NAME_ENV: &str = "LOGGER_NAME";

/// Install the global subscriber from the logging configuration.
pub fn init(config: &LoggingConfig) {
    std::env::set_var(LOGGER_NAME_ENV, &config.name);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_filter()));

    if let Some(path) = &config.path {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .try_init();
            return;
        }
    }

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
