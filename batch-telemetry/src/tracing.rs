//! Tracing subscriber setup.
//!
//! Production runs write through a non-blocking appender, either to stdout or to a daily rolling
//! file. The returned [`LogFlusher`] must be kept alive for the whole run; dropping it flushes any
//! buffered lines, which matters when the process exits right after a failed batch.

use std::path::Path;
use std::sync::Once;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable that turns on log output in tests.
const ENABLE_TEST_TRACING_ENV_NAME: &str = "ENABLE_TRACING";

static TEST_TRACING: Once = Once::new();

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to forward `log` records to tracing: {0}")]
    LogBridge(#[from] tracing_log::log::SetLoggerError),

    #[error("failed to install the global tracing subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Flushes buffered log lines when dropped.
#[must_use = "dropping the flusher stops background log writing"]
pub struct LogFlusher {
    _guard: WorkerGuard,
}

/// Installs the global subscriber for `app_name`.
///
/// `RUST_LOG` overrides the default filter of `{app_name}=info,batch=info`. When `log_dir` is set,
/// output goes to `{log_dir}/{app_name}.log.YYYY-MM-DD` instead of stdout.
pub fn init_tracing(app_name: &str, log_dir: Option<&Path>) -> Result<LogFlusher, TracingError> {
    let (writer, guard) = match log_dir {
        Some(dir) => tracing_appender::non_blocking(tracing_appender::rolling::daily(
            dir,
            format!("{app_name}.log"),
        )),
        None => tracing_appender::non_blocking(std::io::stdout()),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{}=info,batch=info", app_name.replace('-', "_"))));

    LogTracer::init()?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(log_dir.is_none())
                .with_target(true),
        )
        .try_init()?;

    Ok(LogFlusher { _guard: guard })
}

/// Installs a test subscriber once per process when `ENABLE_TRACING` is set.
///
/// Output goes through the test harness writer so it is captured per test.
pub fn init_test_tracing() {
    TEST_TRACING.call_once(|| {
        if std::env::var(ENABLE_TEST_TRACING_ENV_NAME).is_err() {
            return;
        }

        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("batch=debug"));

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_test_writer())
            .try_init();
    });
}
