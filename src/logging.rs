use directories::ProjectDirs;
use flexi_logger::{
    detailed_format, Age, Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming,
};

use crate::config::LoggingConfig;
use crate::error::VmSqlError;

const LOG_FILES_KEPT: usize = 7;

/// Start logging to daily rotated files under the app's data directory.
/// Warnings and errors are also echoed to stderr.
///
/// Logging stops when the returned handle is dropped, so `main` keeps it.
pub fn setup_logging(
    project_dirs: &ProjectDirs,
    config: &LoggingConfig,
) -> Result<LoggerHandle, VmSqlError> {
    let log_dir = project_dirs.data_local_dir().join("logs");

    Logger::try_with_str(config.log_spec())
        .and_then(|logger| {
            logger
                .log_to_file(FileSpec::default().directory(log_dir).basename("vmsql"))
                .format_for_files(detailed_format)
                .duplicate_to_stderr(Duplicate::Warn)
                .rotate(
                    Criterion::Age(Age::Day),
                    Naming::Timestamps,
                    Cleanup::KeepLogFiles(LOG_FILES_KEPT),
                )
                .start()
        })
        .map_err(|e| VmSqlError::Error(format!("Failed to start logging: {}", e)))
}
