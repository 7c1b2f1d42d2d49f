//! Structured logging bootstrap (console + rolling file) and log retention.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LogConfig;
use crate::error::LedgerError;

const DEFAULT_FILTER: &str = "info,pos_ledger=debug";

/// Rolling file name prefix; the appender adds a `.YYYY-MM-DD` suffix.
pub const LOG_FILE_PREFIX: &str = "ledger";

/// Install the global subscriber.
///
/// Console output is always on. When `cfg.dir` is set, a daily rolling file
/// layer is added and old files beyond `cfg.max_files` are pruned first. The
/// returned guard flushes the file writer when dropped, so the caller keeps
/// it alive for the lifetime of the process.
///
/// A subscriber installed earlier (by a host application or a test) wins;
/// that is not an error.
pub fn init_logging(cfg: &LogConfig) -> Result<Option<WorkerGuard>, LedgerError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (file_layer, guard) = match cfg.dir.as_deref() {
        Some(dir) => {
            prune_old_logs(dir, cfg.max_files);
            fs::create_dir_all(dir)
                .map_err(|e| LedgerError::Config(format!("create log dir {}: {e}", dir.display())))?;

            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = if cfg.json {
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true)
                    .boxed()
            } else {
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true)
                    .boxed()
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_layer = fmt::layer().with_target(true);
    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init();
    if installed.is_err() {
        warn!("global tracing subscriber already installed; keeping the existing one");
    }

    tracing::info!("pos-ledger v{} logging initialised", env!("CARGO_PKG_VERSION"));
    Ok(guard)
}

/// Prune old log files, keeping only the most recent `max_files`.
pub fn prune_old_logs(log_dir: &Path, max_files: usize) {
    if !log_dir.exists() {
        return;
    }

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
    if let Ok(entries) = fs::read_dir(log_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let is_log = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|name| name.starts_with(LOG_FILE_PREFIX))
                .unwrap_or(false);
            if is_log {
                let modified = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(std::time::UNIX_EPOCH);
                log_files.push((path, modified));
            }
        }
    }

    // Newest first; ties broken by name so dated suffixes order correctly.
    log_files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));

    for (path, _) in log_files.iter().skip(max_files) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prune_keeps_newest_log_files_only() {
        let dir = tempfile::tempdir().unwrap();
        for day in 1..=5 {
            fs::write(dir.path().join(format!("ledger.2026-03-0{day}")), "x").unwrap();
        }
        fs::write(dir.path().join("notes.txt"), "keep me").unwrap();

        prune_old_logs(dir.path(), 2);

        let mut remaining: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        remaining.sort();
        assert_eq!(remaining.len(), 3);
        assert!(remaining.contains(&"notes.txt".to_string()));
    }

    #[test]
    fn test_prune_missing_dir_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        prune_old_logs(&dir.path().join("does-not-exist"), 1);
    }

    #[test]
    fn test_init_logging_creates_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        let cfg = LogConfig {
            dir: Some(log_dir.clone()),
            json: true,
            max_files: 3,
        };
        let guard = init_logging(&cfg).unwrap();
        assert!(guard.is_some());
        assert!(log_dir.is_dir());
    }
}
