use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const LOG_FILE_BASENAME: &str = "yardview.log";
const LOG_DIR_ENV: &str = "YARDVIEW_LOG_PATH";
const LOG_RETENTION_DAYS: u64 = 7;

/// Daily rolling file at `info`, stderr at `warn` so the console presenter stays readable.
/// `RUST_LOG` overrides both.
pub fn init_logging() -> Result<WorkerGuard> {
    let log_dir = resolve_log_dir()?;
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory: {:?}", log_dir))?;

    let pruned = prune_old_logs(
        &log_dir,
        Duration::from_secs(60 * 60 * 24 * LOG_RETENTION_DAYS),
    );

    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_BASENAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_filter(env_filter_or("info"));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(env_filter_or("warn"));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .init();

    if pruned > 0 {
        tracing::info!("Removed {} old log files from {:?}", pruned, log_dir);
    }
    Ok(guard)
}

fn env_filter_or(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// `YARDVIEW_LOG_PATH`, else `logs/` under the platform's local data dir
fn resolve_log_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(LOG_DIR_ENV).filter(|dir| !dir.is_empty()) {
        return Ok(PathBuf::from(dir));
    }

    ProjectDirs::from("dev", "yardview", "dashboard")
        .map(|dirs| dirs.data_local_dir().join("logs"))
        .context("Failed to determine project directories for log path")
}

/// Remove rotated `yardview.log*` files last written before `max_age` ago.
/// Returns how many were deleted.
fn prune_old_logs(log_dir: &Path, max_age: Duration) -> usize {
    let (Some(cutoff), Ok(entries)) = (
        SystemTime::now().checked_sub(max_age),
        std::fs::read_dir(log_dir),
    ) else {
        return 0;
    };

    entries
        .flatten()
        .filter(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .starts_with(LOG_FILE_BASENAME)
        })
        .filter(|entry| {
            entry
                .metadata()
                .and_then(|meta| Ok(meta.is_file() && meta.modified()? < cutoff))
                .unwrap_or(false)
        })
        .filter(|entry| std::fs::remove_file(entry.path()).is_ok())
        .count()
}
