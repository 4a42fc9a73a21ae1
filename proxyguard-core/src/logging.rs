use std::io::{self, IsTerminal};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt};

/// Initializes structured JSON logging, filtered by `RUST_LOG` (defaults to
/// `info`). If `PG_LOG_DIR` is set, logs are rolled daily into that
/// directory instead of stdout.
pub fn init_normal_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if let Ok(dir) = std::env::var("PG_LOG_DIR") {
        let appender = rolling::daily(dir, "proxyguard.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);

        fmt()
            .with_env_filter(filter)
            .json()
            .flatten_event(true)
            .with_writer(writer)
            .init();

        // Keep the guard alive for the life of the process so buffered
        // writes are flushed.
        std::mem::forget(guard);
    } else {
        fmt()
            .with_env_filter(filter)
            .json()
            .flatten_event(true)
            .init();
    }
}

pub fn init_logging() {
    if std::env::var("TOKIO_CONSOLE").is_ok() {
        console_subscriber::init();
    } else {
        init_normal_logging();
    }
}

pub fn default_log_mode() -> LogMode {
    if io::stdout().is_terminal() {
        LogMode::Pretty
    } else {
        LogMode::Raw
    }
}

#[derive(Debug, Clone, Copy)]
pub enum LogMode {
    Raw,
    Pretty,
}
