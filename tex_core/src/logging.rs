//! Logging Module
//!
//! tracing-based logging shared by the library and the CLI:
//! - a daily rolling log file (default: system temp dir) that receives the
//!   full per-job record
//! - a quieter stderr layer, so a terminal progress bar stays readable
//! - `RUST_LOG` overrides the default filter
//!
//! # Examples
//!
//! ```no_run
//! use tex_core::logging::{init_logging, LogConfig};
//! use tracing::info;
//!
//! init_logging("tex-convert", LogConfig::default()).expect("Failed to initialize logging");
//! info!("Program started");
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Directory holding `{program}.log.*` files.
    pub log_dir: PathBuf,
    /// Log files kept after start-up cleanup.
    pub max_files: usize,
    /// Level written to the log file.
    pub level: Level,
    /// Level shown on stderr.
    pub stderr_level: Level,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: std::env::temp_dir(),
            max_files: 5,
            level: Level::INFO,
            stderr_level: Level::WARN,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.log_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_max_files(mut self, count: usize) -> Self {
        self.max_files = count;
        self
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_stderr_level(mut self, level: Level) -> Self {
        self.stderr_level = level;
        self
    }
}

/// Default filter when `RUST_LOG` is unset: this library plus the calling
/// binary at `level`.
fn default_filter(program_name: &str, level: Level) -> String {
    format!(
        "tex_core={level},{}={level}",
        program_name.replace('-', "_"),
        level = level
    )
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init_logging(program_name: &str, config: LogConfig) -> Result<()> {
    std::fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("Failed to create log directory: {:?}", config.log_dir))?;

    let log_file_name = format!("{}.log", program_name);
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &config.log_dir, &log_file_name);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(program_name, config.level)));

    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true);

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(false)
        .with_line_number(false)
        .with_filter(LevelFilter::from_level(config.stderr_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .context("Logging was already initialized")?;

    tracing::info!(
        program = program_name,
        log_dir = ?config.log_dir,
        log_file = log_file_name,
        max_files = config.max_files,
        level = ?config.level,
        "Logging system initialized"
    );

    cleanup_old_logs(&config.log_dir, program_name, config.max_files)?;

    Ok(())
}

/// Deletes all but the `max_files` most recently modified logs of
/// `program_name` in `log_dir`.
fn cleanup_old_logs(log_dir: &Path, program_name: &str, max_files: usize) -> Result<()> {
    use std::fs;

    let entries = fs::read_dir(log_dir)
        .with_context(|| format!("Failed to read log directory: {:?}", log_dir))?;

    let prefix = format!("{}.log", program_name);
    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .file_name()
            .map(|n| n.to_string_lossy().starts_with(&prefix))
            .unwrap_or(false);
        if !matches {
            continue;
        }
        if let Ok(modified) = fs::metadata(&path).and_then(|m| m.modified()) {
            log_files.push((path, modified));
        }
    }

    if log_files.len() <= max_files {
        return Ok(());
    }

    log_files.sort_by(|a, b| b.1.cmp(&a.1));
    for (path, _) in log_files.iter().skip(max_files) {
        match fs::remove_file(path) {
            Ok(()) => tracing::debug!(path = ?path, "Removed old log file"),
            Err(e) => tracing::warn!(path = ?path, error = %e, "Failed to remove old log file"),
        }
    }

    Ok(())
}

/// Per-job record: worker id, full command line, captured output and exit
/// code.
///
/// Exit 0 logs at INFO with the output at DEBUG; anything else logs at ERROR
/// with the output attached. `exit_code = None` means the program was killed.
pub fn log_conversion(
    worker_id: usize,
    command: &str,
    output: &str,
    exit_code: Option<i32>,
    duration: Duration,
) {
    match exit_code {
        Some(0) => {
            tracing::info!(
                worker_id,
                command = %command,
                duration_secs = duration.as_secs_f64(),
                exit_code = 0,
                "Conversion completed"
            );
            tracing::debug!(worker_id, output = %output, "Conversion output");
        }
        Some(code) => {
            tracing::error!(
                worker_id,
                command = %command,
                duration_secs = duration.as_secs_f64(),
                exit_code = code,
                output = %output,
                "Conversion failed"
            );
        }
        None => {
            tracing::error!(
                worker_id,
                command = %command,
                duration_secs = duration.as_secs_f64(),
                output = %output,
                "Conversion terminated without exit code"
            );
        }
    }
}

/// Skip notice for a file whose command needs no conversion. No command line
/// is logged.
pub fn log_skip(worker_id: usize, path: &Path) {
    tracing::info!(worker_id, path = %path.display(), "Skipped, nothing to convert");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert_eq!(config.max_files, 5);
        assert_eq!(config.level, Level::INFO);
        assert_eq!(config.stderr_level, Level::WARN);
    }

    #[test]
    fn test_log_config_builder() {
        let temp_dir = TempDir::new().unwrap();
        let config = LogConfig::new()
            .with_log_dir(temp_dir.path())
            .with_max_files(3)
            .with_level(Level::DEBUG)
            .with_stderr_level(Level::ERROR);

        assert_eq!(config.log_dir, temp_dir.path());
        assert_eq!(config.max_files, 3);
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.stderr_level, Level::ERROR);
    }

    #[test]
    fn test_default_filter_covers_library_and_binary() {
        assert_eq!(
            default_filter("tex-convert", Level::DEBUG),
            "tex_core=DEBUG,tex_convert=DEBUG"
        );
    }

    #[test]
    fn test_cleanup_old_logs() {
        let temp_dir = TempDir::new().unwrap();
        let program_name = "test_program";

        for i in 0..10 {
            let file_path = temp_dir
                .path()
                .join(format!("{}.log.2026-01-{:02}", program_name, i + 1));
            fs::write(&file_path, format!("log content {}", i)).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        fs::write(temp_dir.path().join("other.log"), "keep").unwrap();

        cleanup_old_logs(temp_dir.path(), program_name, 3).unwrap();

        let remaining: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(program_name))
            .collect();
        assert_eq!(remaining.len(), 3);
        assert!(temp_dir.path().join("other.log").exists());
    }

    #[test]
    fn test_log_helpers_accept_every_outcome() {
        log_conversion(1, "maketx a.png -o a.tx", "ok", Some(0), Duration::from_millis(5));
        log_conversion(2, "maketx b.png -o b.tx", "bad input", Some(1), Duration::from_millis(5));
        log_conversion(3, "maketx c.png -o c.tx", "", None, Duration::from_secs(1));
        log_skip(4, Path::new("/tex/wood_1K_diff.exr"));
    }
}
