use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info_span};

use crate::batch_error;
use crate::concurrency::latch::CountDownLatch;
use crate::error::{BatchResult, ErrorKind};

/// Classification of batch workers, used for spans and panic reporting.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WorkerType {
    /// Reads data files or cursors and publishes rows into the pipeline.
    Producer,
    /// Claims rows from the pipeline and flushes them through a strategy.
    Consumer,
    /// Streams a query result straight into files, without a pipeline.
    Export,
}

impl WorkerType {
    pub fn name(&self) -> &'static str {
        match self {
            WorkerType::Producer => "producer",
            WorkerType::Consumer => "consumer",
            WorkerType::Export => "export",
        }
    }

    fn panic_kind(&self) -> ErrorKind {
        match self {
            WorkerType::Producer => ErrorKind::ProducerWorkerPanic,
            WorkerType::Consumer => ErrorKind::ConsumerWorkerPanic,
            WorkerType::Export => ErrorKind::ExportWorkerPanic,
        }
    }
}

/// A fixed-size group of workers of one type.
///
/// Each spawned worker holds a guard on the pool's [`CountDownLatch`], so the latch reaches zero
/// once every worker has stopped, whether it finished, failed or panicked.
#[derive(Debug)]
pub struct WorkerPool<R> {
    worker_type: WorkerType,
    join_set: JoinSet<(usize, BatchResult<R>)>,
    latch: Arc<CountDownLatch>,
}

impl<R> WorkerPool<R>
where
    R: Send + 'static,
{
    /// Creates a pool expecting `size` workers.
    pub fn new(worker_type: WorkerType, size: usize) -> Self {
        Self {
            worker_type,
            join_set: JoinSet::new(),
            latch: CountDownLatch::new(size),
        }
    }

    /// Latch counting the workers that have not stopped yet.
    pub fn latch(&self) -> Arc<CountDownLatch> {
        self.latch.clone()
    }

    pub fn len(&self) -> usize {
        self.join_set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.join_set.is_empty()
    }

    /// Spawns worker `worker_id` on the runtime.
    pub fn spawn<F>(&mut self, worker_id: usize, worker: F)
    where
        F: Future<Output = BatchResult<R>> + Send + 'static,
    {
        let guard = self.latch.guard();
        let span = info_span!("worker", worker_type = self.worker_type.name(), worker_id);

        self.join_set.spawn(
            async move {
                let _guard = guard;
                (worker_id, worker.await)
            }
            .instrument(span),
        );

        debug!(worker_type = self.worker_type.name(), worker_id, "spawned worker");
    }

    /// Waits for every worker and returns their reports in completion order.
    ///
    /// Failures do not stop the wait: all workers run to the end and their errors are
    /// aggregated into one.
    pub async fn wait_all(mut self) -> BatchResult<Vec<R>> {
        let mut reports = Vec::with_capacity(self.join_set.len());
        let mut errors = Vec::new();

        while let Some(result) = self.join_set.join_next().await {
            match result {
                Ok((_, Ok(report))) => reports.push(report),
                Ok((worker_id, Err(err))) => {
                    error!(
                        worker_type = self.worker_type.name(),
                        worker_id,
                        error = %err,
                        "worker completed with error"
                    );
                    errors.push(err);
                }
                Err(join_err) => {
                    if join_err.is_cancelled() {
                        errors.push(batch_error!(
                            ErrorKind::OperationCancelled,
                            "Worker was cancelled",
                            join_err
                        ));
                    } else {
                        errors.push(batch_error!(
                            self.worker_type.panic_kind(),
                            "Worker panicked",
                            join_err
                        ));
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(reports)
        } else {
            Err(errors.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bail;

    #[tokio::test]
    async fn reports_are_collected() {
        let mut pool = WorkerPool::new(WorkerType::Consumer, 3);
        for worker_id in 0..3 {
            pool.spawn(worker_id, async move { Ok(worker_id * 10) });
        }

        let latch = pool.latch();
        let mut reports = pool.wait_all().await.unwrap();
        reports.sort();

        assert_eq!(reports, vec![0, 10, 20]);
        assert_eq!(latch.count(), 0);
    }

    #[tokio::test]
    async fn failures_are_aggregated_and_siblings_finish() {
        let mut pool = WorkerPool::<usize>::new(WorkerType::Consumer, 3);
        pool.spawn(0, async { bail!(ErrorKind::QueryFailed, "first") });
        pool.spawn(1, async { Ok(1) });
        pool.spawn(2, async { bail!(ErrorKind::InvalidData, "second") });

        let latch = pool.latch();
        let err = pool.wait_all().await.unwrap_err();

        let mut kinds = err.kinds();
        kinds.sort_by_key(|kind| format!("{kind:?}"));
        assert_eq!(kinds, vec![ErrorKind::InvalidData, ErrorKind::QueryFailed]);
        assert_eq!(latch.count(), 0);
    }

    #[tokio::test]
    #[allow(unreachable_code)]
    async fn panics_map_to_the_worker_type() {
        let mut pool = WorkerPool::<()>::new(WorkerType::Export, 1);
        pool.spawn(0, async {
            panic!("boom");
            Ok(())
        });

        let latch = pool.latch();
        let err = pool.wait_all().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ExportWorkerPanic);
        assert_eq!(latch.count(), 0);
    }
}
