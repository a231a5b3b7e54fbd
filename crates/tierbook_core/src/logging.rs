//! Logging bootstrap for the core.
//!
//! # Responsibility
//! - Initialize file-based logging exactly once per process.
//!
//! # Invariants
//! - Re-initialization with the same directory is idempotent.
//! - Re-initialization with a different directory is rejected.
//! - Initialization never panics.

use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::info;
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};

const LOG_FILE_BASENAME: &str = "tierbook";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 5 * 1024 * 1024;
const MAX_LOG_FILES: usize = 3;

static LOGGING_STATE: OnceCell<LoggingState> = OnceCell::new();

struct LoggingState {
    log_dir: PathBuf,
    _logger: LoggerHandle,
}

/// Initializes core logging into `log_dir` at the given level.
///
/// # Errors
/// - Returns an error when `level` is not one of trace|debug|info|warn|error.
/// - Returns an error when `log_dir` is not an absolute path or cannot be
///   created.
/// - Returns an error when logging is already active in another directory.
pub fn init_logging(level: &str, log_dir: &str) -> Result<(), String> {
    let level = match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" | "warning" => "warn",
        "error" => "error",
        other => return Err(format!("unsupported log level `{other}`")),
    };

    let dir = Path::new(log_dir.trim());
    if log_dir.trim().is_empty() || !dir.is_absolute() {
        return Err(format!("log_dir must be an absolute path, got `{log_dir}`"));
    }
    let dir = dir.to_path_buf();

    let state = LOGGING_STATE.get_or_try_init(|| -> Result<LoggingState, String> {
        std::fs::create_dir_all(&dir)
            .map_err(|err| format!("failed to create log directory `{}`: {err}", dir.display()))?;

        let logger = Logger::try_with_str(level)
            .map_err(|err| format!("invalid log level `{level}`: {err}"))?
            .log_to_file(FileSpec::default().directory(&dir).basename(LOG_FILE_BASENAME))
            .rotate(
                Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
                Naming::Numbers,
                Cleanup::KeepLogFiles(MAX_LOG_FILES),
            )
            .write_mode(WriteMode::BufferAndFlush)
            .append()
            .format_for_files(flexi_logger::detailed_format)
            .start()
            .map_err(|err| format!("failed to start logger: {err}"))?;

        info!(
            "event=logging_init module=logging status=ok level={level} version={}",
            env!("CARGO_PKG_VERSION")
        );

        Ok(LoggingState {
            log_dir: dir.clone(),
            _logger: logger,
        })
    })?;

    if state.log_dir != dir {
        return Err(format!(
            "logging already initialized at `{}`; refusing to switch to `{}`",
            state.log_dir.display(),
            dir.display()
        ));
    }
    Ok(())
}

/// Returns the active log directory, or `None` before initialization.
pub fn logging_status() -> Option<PathBuf> {
    LOGGING_STATE.get().map(|state| state.log_dir.clone())
}
