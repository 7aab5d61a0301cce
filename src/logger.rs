//! File logging for `--debug` runs, rotated daily in local time.

use anyhow::{Context, Result};
use logroller::{LogRollerBuilder, Rotation, RotationAge, TimeZone};
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};
use time::UtcOffset;
use time::macros::format_description;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::prelude::*;

use crate::config::Config;

/// Log files are named `timelapse.YYYY-MM-DD`.
const LOG_PREFIX: &str = "timelapse";
const RETENTION: Duration = Duration::from_secs(3 * 24 * 60 * 60);

/// Install the global subscriber writing to `config.log_path`.
///
/// `RUST_LOG` narrows the output; the floor is `debug`.
pub fn init(config: &Config) -> Result<()> {
    fs::create_dir_all(&config.log_path)
        .with_context(|| format!("Failed to create log directory: {}", config.log_path.display()))?;
    cleanup_old_logs(&config.log_path)?;

    let appender = LogRollerBuilder::new(config.log_path.as_path(), Path::new(LOG_PREFIX))
        .rotation(Rotation::AgeBased(RotationAge::Daily))
        .time_zone(TimeZone::Local)
        .max_keep_files(3)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to create log roller: {e}"))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let timer = OffsetTime::new(
        offset,
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    );

    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()))
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_timer(timer),
        );
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set global subscriber: {e}"))?;

    // The worker flushes until exit.
    std::mem::forget(guard);
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "logging initialized");
    Ok(())
}

fn is_expired(path: &Path, cutoff: SystemTime) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .is_ok_and(|modified| modified < cutoff)
}

/// Remove `timelapse.*` files older than the retention period.
pub fn cleanup_old_logs(log_path: &Path) -> Result<()> {
    if !log_path.is_dir() {
        return Ok(());
    }
    let cutoff = SystemTime::now() - RETENTION;

    for entry in fs::read_dir(log_path)? {
        let path = entry?.path();
        let ours = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(LOG_PREFIX));
        if ours && path.is_file() && is_expired(&path, cutoff) {
            let _ = fs::remove_file(&path);
        }
    }
    Ok(())
}
