//! Display recent log entries from the application.

use anyhow::anyhow;
use std::fs;
use std::path::{Path, PathBuf};

use crate::logging::{log_dir, LOG_FILE_PREFIX};

const DEFAULT_LINES: usize = 50;

/// Shows the last lines of the most recent log file.
///
/// # Errors
/// - If the log directory cannot be determined
/// - If the log file cannot be read
pub fn handle_logs() -> Result<(), anyhow::Error> {
    let dir = log_dir()?;

    if !dir.exists() {
        println!("Log directory does not exist yet: {}", dir.display());
        println!("Logs will be created when the recorder runs.");
        return Ok(());
    }

    let Some(log_file) = find_latest_log(&dir)? else {
        println!("No log files found in: {}", dir.display());
        println!("Run 'vmemo' to generate logs.");
        return Ok(());
    };

    let content =
        fs::read_to_string(&log_file).map_err(|e| anyhow!("Failed to read log file: {e}"))?;

    if content.is_empty() {
        println!("Log file is empty: {}", log_file.display());
        return Ok(());
    }

    let lines: Vec<&str> = content.lines().collect();
    let shown = tail(&lines, DEFAULT_LINES);

    println!();
    if shown.len() < lines.len() {
        println!("Showing last {} of {} lines:", shown.len(), lines.len());
    } else {
        println!("Showing all {} lines:", lines.len());
    }
    println!("Full log file at: {}", log_file.display());
    println!();

    for line in shown {
        println!("{line}");
    }

    Ok(())
}

fn tail<'a>(lines: &'a [&'a str], count: usize) -> &'a [&'a str] {
    &lines[lines.len().saturating_sub(count)..]
}

/// Most recently modified vmemo log file in `dir`, if any.
fn find_latest_log(dir: &Path) -> Result<Option<PathBuf>, anyhow::Error> {
    let entries = fs::read_dir(dir).map_err(|e| anyhow!("Failed to read log directory: {e}"))?;

    let mut latest: Option<(PathBuf, std::time::SystemTime)> = None;
    for entry in entries {
        let path = entry
            .map_err(|e| anyhow!("Failed to read directory entry: {e}"))?
            .path();

        if !path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(LOG_FILE_PREFIX))
        {
            continue;
        }

        let Ok(modified) = fs::metadata(&path).and_then(|m| m.modified()) else {
            continue;
        };
        if latest.as_ref().map_or(true, |(_, newest)| modified > *newest) {
            latest = Some((path, modified));
        }
    }

    Ok(latest.map(|(path, _)| path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail() {
        let lines = ["a", "b", "c"];
        assert_eq!(tail(&lines, 2), &["b", "c"]);
        assert_eq!(tail(&lines, 10), &["a", "b", "c"]);
    }

    #[test]
    fn test_find_latest_log_ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_latest_log(dir.path()).unwrap().is_none());

        fs::write(dir.path().join("vmemo.log.2026-10-15"), "old").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(dir.path().join("vmemo.log.2026-10-16"), "new").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(dir.path().join("unrelated.txt"), "noise").unwrap();

        let latest = find_latest_log(dir.path()).unwrap().unwrap();
        assert!(latest.ends_with("vmemo.log.2026-10-16"));
    }
}
