use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};

const LOG_FILE_BASENAME: &str = "timetabled";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 5 * 1024 * 1024;
const MAX_LOG_FILES: usize = 3;

static LOGGING_STATE: OnceCell<LoggingState> = OnceCell::new();

struct LoggingState {
    log_dir: PathBuf,
    _logger: LoggerHandle,
}

/// Initializes rotating file logs under `log_dir`, once per process.
/// Re-initialization with the same directory is a no-op; a different directory
/// is rejected. stdout is never written to — it carries the IPC protocol.
pub fn init(log_dir: &Path) -> Result<(), String> {
    if let Some(state) = LOGGING_STATE.get() {
        if state.log_dir == log_dir {
            return Ok(());
        }
        return Err(format!(
            "logging already initialized at {}",
            state.log_dir.to_string_lossy()
        ));
    }

    let spec = FileSpec::default()
        .directory(log_dir)
        .basename(LOG_FILE_BASENAME);
    let logger = Logger::try_with_env_or_str("info")
        .map_err(|e| format!("invalid log spec: {}", e))?
        .log_to_file(spec)
        .rotate(
            Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(MAX_LOG_FILES),
        )
        .write_mode(WriteMode::Direct)
        .start()
        .map_err(|e| format!("failed to start logging: {}", e))?;

    let state = LoggingState {
        log_dir: log_dir.to_path_buf(),
        _logger: logger,
    };
    LOGGING_STATE.set(state).map_err(|_| {
        "logging initialized concurrently with a different directory".to_string()
    })?;
    Ok(())
}
