use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::histogram;
use tracing::{error, info, warn};

use crate::error::BatchResult;
use crate::metrics::{BATCH_RUN_DURATION_SECONDS, OPERATION_LABEL};
use crate::stats::DebugInfo;

/// A batch operation with a three-phase lifecycle.
///
/// [`run_executor`] drives the phases: `pre_check` validates the command and loads metadata
/// without touching any data, `execute` does the work, and `close` releases resources and runs
/// no matter how the other phases ended.
pub trait Executor: Send {
    /// Name of the operation, used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Statistics collected by the run.
    fn debug_info(&self) -> Arc<DebugInfo>;

    /// Rejects invalid commands before any data is read or written.
    fn pre_check(&mut self) -> impl Future<Output = BatchResult<()>> + Send;

    /// Performs the operation.
    fn execute(&mut self) -> impl Future<Output = BatchResult<()>> + Send;

    /// Releases resources held by the executor.
    fn close(&mut self) -> impl Future<Output = BatchResult<()>> + Send;
}

/// Outcome of [`run_executor`].
#[derive(Debug)]
pub struct RunReport {
    pub operation: &'static str,
    /// Wall-clock time of `execute` alone; zero when `pre_check` failed.
    pub elapsed: Duration,
    pub debug_info: Arc<DebugInfo>,
    pub result: BatchResult<()>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Logs the outcome together with the statistics gathered so far.
    pub fn log(&self) {
        match &self.result {
            Ok(()) => info!(
                operation = self.operation,
                elapsed_ms = self.elapsed.as_millis() as u64,
                "batch run finished\n{}",
                self.debug_info
            ),
            Err(err) => error!(
                operation = self.operation,
                elapsed_ms = self.elapsed.as_millis() as u64,
                category = ?err.category(),
                error = %err,
                "batch run failed\n{}",
                self.debug_info
            ),
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.is_success() { "succeeded" } else { "failed" };
        writeln!(
            f,
            "{} {status} in {:.3}s",
            self.operation,
            self.elapsed.as_secs_f64()
        )?;
        write!(f, "{}", self.debug_info)
    }
}

/// Runs `pre_check`, `execute` and `close` in order.
///
/// `execute` only runs after a successful `pre_check`. `close` always runs; its failure is logged
/// and never replaces the result of the earlier phases.
pub async fn run_executor<E: Executor>(mut executor: E) -> RunReport {
    let operation = executor.name();
    let debug_info = executor.debug_info();

    info!(operation, "running pre-check");
    let (elapsed, result) = match executor.pre_check().await {
        Ok(()) => {
            info!(operation, "pre-check passed, executing");
            let started = Instant::now();
            let result = executor.execute().await;
            (started.elapsed(), result)
        }
        Err(err) => {
            error!(operation, error = %err, "pre-check failed");
            (Duration::ZERO, Err(err))
        }
    };

    histogram!(BATCH_RUN_DURATION_SECONDS, OPERATION_LABEL => operation)
        .record(elapsed.as_secs_f64());

    if let Err(err) = executor.close().await {
        warn!(operation, error = %err, "failed to close executor");
    }

    RunReport {
        operation,
        elapsed,
        debug_info,
        result,
    }
}
