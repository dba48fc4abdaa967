//! Tracing subscriber setup
//!
//! Console output plus an optional daily-rolling file named
//! `<prefix>.<yyyy-mm-dd>.log`. `RUST_LOG` overrides the configured level.

use crate::infrastructure::config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/**
 * Installs the global subscriber
 *
 * Returns the file writer's guard, which must be held for as long as logs
 * should be flushed. Returns `None` when file logging is off, when the log
 * directory cannot be used, or when a subscriber is already installed.
 */
pub fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let console = fmt::layer().with_target(false);

    if !config.file_enabled {
        let _ = tracing_subscriber::registry()
            .with(env_filter(config))
            .with(console)
            .try_init();
        return None;
    }

    let appender = std::fs::create_dir_all(&config.directory)
        .map_err(|e| e.to_string())
        .and_then(|_| {
            RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(&config.file_prefix)
                .filename_suffix("log")
                .build(&config.directory)
                .map_err(|e| e.to_string())
        });

    let appender = match appender {
        Ok(appender) => appender,
        Err(e) => {
            let installed = tracing_subscriber::registry()
                .with(env_filter(config))
                .with(console)
                .try_init()
                .is_ok();
            if installed {
                tracing::warn!(
                    directory = %config.directory.display(),
                    error = %e,
                    "File logging unavailable, logging to console only"
                );
            }
            return None;
        }
    };

    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file = fmt::layer().with_ansi(false).with_writer(writer);

    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(console)
        .with(file)
        .try_init()
        .ok()
        .map(|_| {
            tracing::info!(directory = %config.directory.display(), "Logging initialized");
            guard
        })
}
