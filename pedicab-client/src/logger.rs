//! Logging Infrastructure
//!
//! `RUST_LOG` takes precedence over the configured level when set.

use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Initialize the logger with optional daily rolling file output
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logger(log_level: &str, log_dir: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_target(false);

    if let Some(dir) = log_dir {
        let log_path = Path::new(dir);
        if log_path.is_dir() {
            let file_appender = tracing_appender::rolling::daily(log_path, "pedicab-client");
            let _ = subscriber.with_ansi(false).with_writer(file_appender).try_init();
            return;
        }
        eprintln!("log directory {dir} does not exist, logging to stderr");
    }

    let _ = subscriber.try_init();
}

/// Initialize the logger from a [`crate::ClientConfig`]
pub fn init_from_config(config: &crate::ClientConfig) {
    init_logger(&config.log_level, config.log_dir.as_deref());
}
