//! Logging setup for globescene hosts.
//!
//! Structured logging with dual output:
//! - Writes to a per-session log file (truncated on startup)
//! - Also prints to stdout for tailing during development
//! - Filterable via the RUST_LOG environment variable
//!
//! The engine itself only emits `tracing` events; a host that already has
//! its own subscriber can skip this module entirely.

use std::fs;
use std::io;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Default directory for log files.
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Default log file name.
pub const DEFAULT_LOG_FILE: &str = "globescene.log";

/// Keeps the non-blocking log writer alive.
///
/// Dropping the guard flushes and closes the log file.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Install the global subscriber writing to both a file and stdout.
///
/// The previous session's log file is truncated. The filter defaults to
/// `info` when RUST_LOG is unset.
///
/// # Errors
///
/// Returns an error when the log directory cannot be created or the log
/// file cannot be truncated.
pub fn init_logging(log_dir: &str, log_file: &str) -> Result<LoggingGuard, io::Error> {
    fs::create_dir_all(log_dir)?;

    let log_path = Path::new(log_dir).join(log_file);
    fs::write(&log_path, "")?;

    let file_appender = tracing_appender::rolling::never(log_dir, log_file);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_span_events(FmtSpan::CLOSE);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_ansi(true)
        .with_span_events(FmtSpan::CLOSE);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}
