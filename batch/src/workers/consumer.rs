//! Pipeline consumers.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, info, warn};

use crate::concurrency::pipeline::Subscriber;
use crate::concurrency::shutdown::ShutdownRx;
use crate::context::ConsumerContext;
use crate::error::BatchResult;
use crate::metrics::{BATCH_ROWS_PROCESSED_TOTAL, TABLE_NAME_LABEL, WORKER_TYPE_LABEL};
use crate::stats::DebugInfo;
use crate::types::RowEvent;
use crate::workers::sink::FlushSink;
use crate::workers::strategy::{Flush, FlushThresholds, RowStrategy, StrategyKind};

/// Lifecycle of a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// Binding table metadata.
    Init,
    /// Claiming rows and flushing full buffers.
    Running,
    /// End of stream (or shutdown) reached; flushing what is left in the buffers.
    Draining,
    /// Terminal.
    Stopped,
}

/// Outcome of a consumer that stopped without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerReport {
    pub worker_id: usize,
    pub rows: u64,
    pub flushes: u64,
    /// The consumer stopped on the shutdown signal before the stream ended.
    pub interrupted: bool,
}

/// Claims row events from the pipeline and pushes them through a [`RowStrategy`] into a sink.
///
/// A failing flush stops the consumer; rows it already claimed are not retried and other
/// consumers keep going.
pub struct ConsumerWorker<S> {
    worker_id: usize,
    table: String,
    kind: StrategyKind,
    thresholds: FlushThresholds,
    context: Arc<ConsumerContext>,
    subscriber: Subscriber<RowEvent>,
    sink: S,
    debug_info: Arc<DebugInfo>,
    shutdown_rx: ShutdownRx,
}

impl<S> ConsumerWorker<S>
where
    S: FlushSink,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker_id: usize,
        table: impl Into<String>,
        kind: StrategyKind,
        thresholds: FlushThresholds,
        context: Arc<ConsumerContext>,
        subscriber: Subscriber<RowEvent>,
        sink: S,
        debug_info: Arc<DebugInfo>,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            worker_id,
            table: table.into(),
            kind,
            thresholds,
            context,
            subscriber,
            sink,
            debug_info,
            shutdown_rx,
        }
    }

    /// Runs the consumer to completion.
    ///
    /// The sink is closed in every case; a close failure is logged and does not replace the
    /// consumer's own result.
    pub async fn run(mut self) -> BatchResult<ConsumerReport> {
        let result = self.consume().await;

        // Stop claiming before the sink goes away so publishers notice a dead pool.
        drop(self.subscriber);
        if let Err(err) = self.sink.close().await {
            warn!(worker_id = self.worker_id, error = %err, "failed to close consumer sink");
        }

        debug!(worker_id = self.worker_id, state = ?ConsumerState::Stopped, "consumer stopped");

        result
    }

    async fn consume(&mut self) -> BatchResult<ConsumerReport> {
        let mut report = ConsumerReport {
            worker_id: self.worker_id,
            rows: 0,
            flushes: 0,
            interrupted: false,
        };

        debug!(worker_id = self.worker_id, state = ?ConsumerState::Init, "consumer state");
        let mut strategy = RowStrategy::bind(
            self.kind.clone(),
            &self.context,
            &self.table,
            self.thresholds,
        )?;

        debug!(worker_id = self.worker_id, state = ?ConsumerState::Running, "consumer state");
        loop {
            let event = tokio::select! {
                biased;

                _ = self.shutdown_rx.wait_for_shutdown() => {
                    info!(worker_id = self.worker_id, "shutdown signal received, draining consumer");
                    report.interrupted = true;
                    break;
                }
                event = self.subscriber.claim() => event,
            };

            let Some(event) = event else {
                break;
            };

            if let Some(flush) = strategy.append(&event)? {
                self.flush(flush, &mut report).await?;
            }
        }

        debug!(
            worker_id = self.worker_id,
            state = ?ConsumerState::Draining,
            buffered_rows = strategy.buffered_rows(),
            "consumer state"
        );
        for flush in strategy.drain() {
            self.flush(flush, &mut report).await?;
        }

        info!(
            worker_id = self.worker_id,
            strategy = strategy.name(),
            rows = report.rows,
            flushes = report.flushes,
            "consumer finished"
        );

        Ok(report)
    }

    async fn flush(&mut self, flush: Flush, report: &mut ConsumerReport) -> BatchResult<()> {
        let rows = flush.rows();
        self.sink.write(flush).await?;

        report.rows += rows;
        report.flushes += 1;
        self.debug_info.rows_processed(rows, true);
        counter!(
            BATCH_ROWS_PROCESSED_TOTAL,
            TABLE_NAME_LABEL => self.table.clone(),
            WORKER_TYPE_LABEL => "consumer",
        )
        .increment(rows);

        Ok(())
    }
}
