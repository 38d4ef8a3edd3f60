//! Log setup: terse console output plus a detailed daily log file, with
//! date-stamped rotations pruned after a retention window.

use anyhow::Result;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Rolled files look like `axon.log.2026-08-01`.
const FILE_STEM: &str = "axon.log";
const DEFAULT_RETENTION_DAYS: u64 = 7;

pub struct LoggingSettings<'a> {
    pub level: Option<&'a str>,
    pub directory: Option<&'a str>,
    pub retention_days: Option<u64>,
}

/// Keeps the background log writer alive. Hold it for the process
/// lifetime; dropping it flushes and stops file logging.
pub struct LogGuard {
    _worker: WorkerGuard,
}

pub fn init(settings: LoggingSettings<'_>) -> Result<(PathBuf, LogGuard)> {
    let dir = log_directory(settings.directory)?;
    prune_dated_logs(&dir, settings.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS));

    let appender = tracing_appender::rolling::daily(&dir, FILE_STEM);
    let (writer, worker) = tracing_appender::non_blocking(appender);

    // Console stays readable; the file carries source locations for
    // after-the-fact debugging.
    let console_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(false);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .with_file(true)
        .with_line_number(true);

    // try_init so tests (which may initialize twice) don't panic.
    let _ = tracing_subscriber::registry()
        .with(build_filter(settings.level))
        .with(console_layer)
        .with(file_layer)
        .try_init();

    Ok((dir, LogGuard { _worker: worker }))
}

/// An explicit config level overrides `RUST_LOG`; without one, `RUST_LOG`
/// applies, and the fallback is `axon=info` over a quiet baseline.
fn build_filter(level: Option<&str>) -> EnvFilter {
    let directive_for = |level: &str| format!("axon={}", level).parse().ok();
    if let Some(level) = level {
        let mut filter = EnvFilter::new("warn");
        if let Some(directive) = directive_for(level) {
            filter = filter.add_directive(directive);
        }
        return filter;
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut filter = EnvFilter::new("warn");
        if let Some(directive) = directive_for("info") {
            filter = filter.add_directive(directive);
        }
        filter
    })
}

fn log_directory(configured: Option<&str>) -> Result<PathBuf> {
    let dir = match configured {
        Some(path) => match path.strip_prefix("~/").zip(dirs::home_dir()) {
            Some((rest, home)) => home.join(rest),
            None => PathBuf::from(path),
        },
        None => crate::paths::logs_dir(),
    };
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Remove rotated files whose date suffix falls outside the retention
/// window. Files without a parsable `axon.log.YYYY-MM-DD` name are left
/// alone, so unrelated files in a shared directory are never touched.
fn prune_dated_logs(dir: &Path, retention_days: u64) {
    let cutoff = chrono::Utc::now().date_naive() - chrono::Days::new(retention_days.max(1));
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(date_part) = name
            .strip_prefix(FILE_STEM)
            .and_then(|rest| rest.strip_prefix('.'))
        else {
            continue;
        };
        let Ok(date) = NaiveDate::parse_from_str(date_part, "%Y-%m-%d") else {
            continue;
        };
        if date < cutoff {
            if let Err(e) = std::fs::remove_file(entry.path()) {
                eprintln!("failed to remove old log {}: {}", name, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prune_keeps_recent_and_unrelated_files() {
        let dir = tempfile::tempdir().unwrap();
        let today = chrono::Utc::now().date_naive().format("%Y-%m-%d");
        let recent = dir.path().join(format!("{}.{}", FILE_STEM, today));
        let ancient = dir.path().join(format!("{}.2020-01-01", FILE_STEM));
        let unrelated = dir.path().join("notes.txt");
        let unparsable = dir.path().join(format!("{}.backup", FILE_STEM));
        for path in [&recent, &ancient, &unrelated, &unparsable] {
            std::fs::write(path, "x").unwrap();
        }

        prune_dated_logs(dir.path(), 7);

        assert!(recent.exists());
        assert!(!ancient.exists());
        assert!(unrelated.exists());
        assert!(unparsable.exists());
    }

    #[test]
    fn test_prune_missing_dir_is_noop() {
        prune_dated_logs(Path::new("/nonexistent/axon-logs"), 7);
    }

    #[test]
    fn test_log_directory_explicit_path_created() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("deep/logs");
        let resolved = log_directory(Some(target.to_str().unwrap())).unwrap();
        assert_eq!(resolved, target);
        assert!(target.is_dir());
    }
}
