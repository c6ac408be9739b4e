use std::env;
use std::path::Path;
use tracing::debug;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_LOG_FILE: &str = "./logs/burn-manager.log";

/// Pretty stdout plus a plain-text log file. Keep the returned guard alive
/// until exit so buffered file output is flushed.
pub fn init_logger() -> impl Drop {
    let filter = env::var("TRACING_LEVEL").unwrap_or_else(|_| "info".to_string());
    let log_file_path = env::var("LOG_FILE_PATH").unwrap_or_else(|_| DEFAULT_LOG_FILE.to_string());

    let log_file_path = Path::new(&log_file_path);
    let directory = log_file_path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = log_file_path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| "burn-manager.log".to_string());

    let file_appender = tracing_appender::rolling::never(directory, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .pretty()
                .with_file(false)
                .without_time()
                .with_ansi(true),
        )
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(EnvFilter::new(filter))
        .init();

    debug!("Logging to stdout and {}", log_file_path.display());

    guard
}
