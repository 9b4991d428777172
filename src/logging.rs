//! Structured logging for vmemo using the tracing crate.
//!
//! Log lines go to a daily-rotated file under the XDG state directory, never to
//! the terminal, which belongs to the recorder UI.

use anyhow::anyhow;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing_appender::rolling;
use tracing_subscriber::prelude::*;

/// File name prefix of every log file; rotation appends `.YYYY-MM-DD`.
pub const LOG_FILE_PREFIX: &str = "vmemo.log";

/// Number of rotated log files kept on disk.
const MAX_LOG_FILES: usize = 7;

/// Keeps the non-blocking writer alive for the program lifetime.
static APPENDER_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Initializes file-based logging.
///
/// Log level comes from `RUST_LOG` (default "info").
///
/// # Errors
/// - If the log directory cannot be determined or created
/// - If logging was already initialized
pub fn init_logging() -> Result<(), anyhow::Error> {
    let dir = log_dir()?;
    fs::create_dir_all(&dir)?;

    if let Err(e) = cleanup_old_logs(&dir, MAX_LOG_FILES) {
        eprintln!("Warning: Failed to cleanup old logs: {e}");
    }

    let (writer, guard) = tracing_appender::non_blocking(rolling::daily(&dir, LOG_FILE_PREFIX));
    APPENDER_GUARD
        .set(guard)
        .map_err(|_| anyhow!("Logging already initialized"))?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false),
        )
        .init();

    tracing::debug!("Logging initialized in {}", dir.display());
    Ok(())
}

/// Log directory: `$XDG_STATE_HOME/vmemo`, else `~/.local/state/vmemo`.
pub fn log_dir() -> Result<PathBuf, anyhow::Error> {
    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        if !xdg_state.is_empty() {
            return Ok(PathBuf::from(xdg_state).join("vmemo"));
        }
    }
    let home = dirs::home_dir().ok_or_else(|| anyhow!("Could not determine home directory"))?;
    Ok(home.join(".local").join("state").join("vmemo"))
}

/// Whether `name` is a rotated log file (`vmemo.log.YYYY-MM-DD`).
fn is_rotated_log(name: &str) -> bool {
    name.strip_prefix(LOG_FILE_PREFIX)
        .and_then(|rest| rest.strip_prefix('.'))
        .is_some_and(|date| date.len() == 10 && date.matches('-').count() == 2)
}

/// Removes all but the `keep` most recently modified rotated log files.
fn cleanup_old_logs(dir: &Path, keep: usize) -> Result<(), anyhow::Error> {
    let mut logs: Vec<_> = fs::read_dir(dir)?
        .filter_map(|entry| {
            let path = entry.ok()?.path();
            let name = path.file_name()?.to_str()?;
            if !is_rotated_log(name) {
                return None;
            }
            let modified = fs::metadata(&path).ok()?.modified().ok()?;
            Some((path, modified))
        })
        .collect();

    logs.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in logs.iter().skip(keep) {
        if let Err(e) = fs::remove_file(path) {
            tracing::warn!("Failed to delete old log file {}: {}", path.display(), e);
        }
    }

    Ok(())
}
