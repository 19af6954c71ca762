//! Logging setup
//!
//! The daemon logs to stdout and appends to `harbor-lighthouse.log` in the data
//! directory. One-shot commands only log to stdout. `RUST_LOG` overrides the filter.
//!
//! The file uses the full format so every line written inside a worker carries its
//! `instance{name=...}` span tag; `--logs` filters on it.

use std::io;
use std::path::Path;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const DEFAULT_FILTER: &str = "warn,harbor_lighthouse=info";

/// Keeps the background file writer alive; dropping it flushes the log file
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// `<time> <LEVEL> instance{name=..}: <target>: <message>`, no ANSI codes
pub(crate) fn file_layer<S, W>(writer: W) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + 'static,
{
    tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
}

/// Stdout plus append-only file output
pub fn init_daemon_logging(log_dir: &Path, log_file: &str) -> io::Result<LoggingGuard> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, log_file);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter())
        .with(file_layer(non_blocking_file))
        .with(stdout_layer)
        .try_init()
        .map_err(io::Error::other)?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// Stdout only, for one-shot commands or when the log file is unusable
pub fn init_console_logging() {
    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr).compact())
        .try_init();
}
