use std::path::Path;
use std::sync::Arc;

use batch_config::shared::{
    ExportConfig, ExportWay, HINT_GROUP_PLACEHOLDER, PipelineConfig, ProducerMode, ShardingConfig,
};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::batch_error;
use crate::bail;
use crate::cipher::FieldCipher;
use crate::concurrency::pipeline::EventPipeline;
use crate::concurrency::shutdown::ShutdownRx;
use crate::context::ConsumerContext;
use crate::error::{BatchResult, ErrorKind};
use crate::executor::{Executor, load_metadata};
use crate::file::{ExportFileWriter, FileTarget, RowFormatter};
use crate::mask::column_maskers;
use crate::source::metadata::TableMetadata;
use crate::source::{Connection, DataSource};
use crate::sql::{OrderBy, render_select};
use crate::stats::DebugInfo;
use crate::types::{RowEvent, TableTopology};
use crate::workers::consumer::{ConsumerReport, ConsumerWorker};
use crate::workers::export::{
    DirectExportWorker, ExportReport, ExportTask, count_rows, fixed_file_threshold,
};
use crate::workers::pool::{WorkerPool, WorkerType};
use crate::workers::producer::{CursorProducer, ProducerReport};
use crate::workers::sink::FileSink;
use crate::workers::strategy::{FlushThresholds, StrategyKind};

/// Metadata and formatter resolved by `pre_check`.
#[derive(Debug, Clone)]
struct PreparedExport {
    metadata: TableMetadata,
    formatter: RowFormatter,
}

/// Exports a table into data files.
///
/// Unsharded and ordered exports run a single direct worker on the logical table. Sharded
/// exports run one direct worker per shard, except fixed-file-count exports, which stream every
/// shard through the event pipeline into exactly `k` files.
pub struct ExportExecutor<D> {
    data_source: D,
    table: String,
    config: ExportConfig,
    pipeline: PipelineConfig,
    sharding: ShardingConfig,
    debug_info: Arc<DebugInfo>,
    shutdown_rx: ShutdownRx,
    prepared: Option<PreparedExport>,
}

impl<D> ExportExecutor<D>
where
    D: DataSource,
{
    pub fn new(
        data_source: D,
        table: impl Into<String>,
        config: ExportConfig,
        pipeline: PipelineConfig,
        sharding: ShardingConfig,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            data_source,
            table: table.into(),
            config,
            pipeline,
            sharding,
            debug_info: DebugInfo::new(),
            shutdown_rx,
            prepared: None,
        }
    }

    fn prepared(&self) -> BatchResult<PreparedExport> {
        match &self.prepared {
            Some(prepared) => Ok(prepared.clone()),
            None => bail!(
                ErrorKind::InvalidState,
                "Export executed before a successful pre-check"
            ),
        }
    }

    fn where_condition(&self) -> Option<String> {
        self.config
            .where_condition
            .clone()
            .filter(|condition| !condition.trim().is_empty())
    }

    fn order_by(&self) -> Option<OrderBy> {
        self.config.is_ordered().then(|| OrderBy {
            columns: self.config.order_by.clone(),
            ascending: self.config.ascending,
        })
    }

    fn file_target(&self, index: usize) -> FileTarget {
        FileTarget {
            dir: self.config.path.clone(),
            prefix: self.config.filename_prefix.clone(),
            table: self.table.clone(),
            index,
            compression: self.config.compression,
        }
    }

    fn routing_hint(&self, shard: &TableTopology) -> String {
        self.sharding
            .hint_template
            .replace(HINT_GROUP_PLACEHOLDER, &shard.group_name)
    }

    fn task(
        &self,
        prepared: &PreparedExport,
        index: usize,
        shard: Option<&TableTopology>,
        max_rows: Option<u64>,
    ) -> ExportTask {
        ExportTask {
            query_table: shard
                .map(|shard| shard.table_name.clone())
                .unwrap_or_else(|| self.table.clone()),
            hint: shard.map(|shard| self.routing_hint(shard)),
            fields: prepared.metadata.fields.clone(),
            where_condition: self.where_condition(),
            order_by: self.order_by(),
            max_rows,
            target: self.file_target(index),
            formatter: prepared.formatter.clone(),
            with_header: self.config.with_header,
        }
    }

    /// Rows per file of an export on the logical table.
    async fn rows_per_file(&self) -> BatchResult<Option<u64>> {
        match self.config.way {
            ExportWay::Default => Ok(None),
            ExportWay::MaxLineNumInSingleFile(max_rows) => Ok(Some(max_rows)),
            ExportWay::FixedFileNum(file_count) => {
                let mut conn = self.data_source.connection().await?;
                let counted =
                    count_rows(&mut conn, &self.table, self.where_condition().as_deref()).await;
                if let Err(err) = conn.close().await {
                    warn!(error = %err, "failed to close count connection");
                }

                let total = counted?;
                let threshold = fixed_file_threshold(total, file_count);
                info!(table = %self.table, total, file_count, threshold, "split export by row count");

                Ok(Some(threshold.max(1)))
            }
        }
    }

    async fn run_direct(&self, tasks: Vec<ExportTask>) -> BatchResult<Vec<ExportReport>> {
        let permits = Arc::new(Semaphore::new(self.pipeline.producers));
        let mut pool = WorkerPool::new(WorkerType::Export, tasks.len());
        self.debug_info.set_latch(pool.latch());

        for (index, task) in tasks.into_iter().enumerate() {
            let worker = DirectExportWorker::new(
                index,
                self.table.clone(),
                task,
                self.data_source.clone(),
                permits.clone(),
                self.debug_info.clone(),
                self.shutdown_rx.clone(),
            );
            pool.spawn(index, worker.run());
        }

        pool.wait_all().await
    }

    /// Streams every shard into exactly `file_count` files through the event pipeline.
    ///
    /// Each shard gets a cursor producer, each file a consumer. Rows land in whichever file's
    /// consumer claims them, so file sizes are uneven.
    async fn run_sharded_fixed_files(
        &self,
        prepared: &PreparedExport,
        file_count: usize,
    ) -> BatchResult<u64> {
        let topology = &prepared.metadata.topology;
        let pipeline = EventPipeline::<RowEvent>::new(
            self.pipeline.ring_buffer_size,
            ProducerMode::Multi,
        )?;
        self.debug_info.set_pipeline(pipeline.probe());

        let publishers = topology
            .iter()
            .map(|_| pipeline.publisher())
            .collect::<BatchResult<Vec<_>>>()?;
        let subscribers: Vec<_> = (0..file_count).map(|_| pipeline.subscribe()).collect();

        let context = ConsumerContext::builder().build()?;
        let kind = StrategyKind::ExportRows(prepared.formatter.clone());
        let thresholds =
            FlushThresholds::new(self.pipeline.flush_max_rows, self.pipeline.flush_max_bytes);
        let header = self
            .config
            .with_header
            .then(|| prepared.formatter.header_line(&prepared.metadata.fields));

        let mut consumers = WorkerPool::<ConsumerReport>::new(WorkerType::Consumer, file_count);
        self.debug_info.set_latch(consumers.latch());
        for (worker_id, subscriber) in subscribers.into_iter().enumerate() {
            let writer = ExportFileWriter::new(self.file_target(worker_id), header.clone(), None);
            let worker = ConsumerWorker::new(
                worker_id,
                self.table.clone(),
                kind.clone(),
                thresholds,
                context.clone(),
                subscriber,
                FileSink::new(writer, self.debug_info.clone()),
                self.debug_info.clone(),
                self.shutdown_rx.clone(),
            );
            consumers.spawn(worker_id, worker.run());
        }

        let permits = Arc::new(Semaphore::new(self.pipeline.producers));
        let mut producers = WorkerPool::<ProducerReport>::new(WorkerType::Producer, topology.len());
        for (index, (shard, publisher)) in topology.iter().zip(publishers).enumerate() {
            let hint = self.routing_hint(shard);
            let sql = render_select(
                Some(&hint),
                &shard.table_name,
                &prepared.metadata.fields,
                self.where_condition().as_deref(),
                None,
            );
            let data_source = self.data_source.clone();
            let permits = permits.clone();
            let table = self.table.clone();
            let debug_info = self.debug_info.clone();
            let shutdown_rx = self.shutdown_rx.clone();

            producers.spawn(index, async move {
                let _permit = permits.acquire_owned().await.map_err(|err| {
                    batch_error!(ErrorKind::InvalidState, "Producer permits were closed", err)
                })?;
                let conn = data_source.connection().await?;

                CursorProducer::new(index, conn, sql, table, publisher, debug_info, shutdown_rx)
                    .run()
                    .await
            });
        }

        let produced = producers.wait_all().await;
        let consumed = consumers.wait_all().await;

        match (produced, consumed) {
            (Ok(_), Ok(reports)) => Ok(reports.iter().map(|report| report.rows).sum()),
            (Err(err), Ok(_)) | (Ok(_), Err(err)) => Err(err),
            (Err(produce_err), Err(consume_err)) => Err(vec![produce_err, consume_err].into()),
        }
    }
}

impl<D> Executor for ExportExecutor<D>
where
    D: DataSource,
{
    fn name(&self) -> &'static str {
        "export"
    }

    fn debug_info(&self) -> Arc<DebugInfo> {
        self.debug_info.clone()
    }

    async fn pre_check(&mut self) -> BatchResult<()> {
        self.config.validate()?;
        self.pipeline.validate()?;
        self.sharding.validate()?;

        if self.table.trim().is_empty() {
            bail!(ErrorKind::ConfigError, "Export needs a table name");
        }

        check_output_dir(&self.file_target(0).file_path(None)).await?;

        let cipher = FieldCipher::from_config(&self.config.encryption)?.map(Arc::new);

        let metadata = load_metadata(&self.data_source, &self.table, self.sharding.enabled).await?;
        if self.sharding.enabled && metadata.topology.is_empty() {
            bail!(
                ErrorKind::MissingTableMetadata,
                "Sharded export found no shards",
                format!("table `{}`", self.table)
            );
        }

        for column in &self.config.order_by {
            if !metadata
                .fields
                .iter()
                .any(|field| field.name.eq_ignore_ascii_case(column))
            {
                bail!(
                    ErrorKind::ConfigError,
                    "Order-by column does not exist",
                    format!("table `{}` has no column `{column}`", self.table)
                );
            }
        }

        let maskers = column_maskers(&self.config.masks, &metadata.fields)?;
        let formatter = RowFormatter::new(
            self.config.separator.clone(),
            self.config.quote_mode,
            &metadata.fields,
            cipher,
        )
        .with_maskers(maskers);
        self.prepared = Some(PreparedExport {
            metadata,
            formatter,
        });

        Ok(())
    }

    async fn execute(&mut self) -> BatchResult<()> {
        let prepared = self.prepared()?;
        // Ordered exports rely on the server merging shards, so they read the logical table.
        let per_shard = self.sharding.enabled && !self.config.is_ordered();

        let rows = match (per_shard, self.config.way) {
            (true, ExportWay::FixedFileNum(file_count)) => {
                self.run_sharded_fixed_files(&prepared, file_count as usize)
                    .await?
            }
            (true, way) => {
                let max_rows = match way {
                    ExportWay::MaxLineNumInSingleFile(max_rows) => Some(max_rows),
                    _ => None,
                };
                let tasks = prepared
                    .metadata
                    .topology
                    .iter()
                    .enumerate()
                    .map(|(index, shard)| self.task(&prepared, index, Some(shard), max_rows))
                    .collect();

                sum_rows(self.run_direct(tasks).await?)
            }
            (false, _) => {
                let max_rows = self.rows_per_file().await?;
                let task = self.task(&prepared, 0, None, max_rows);

                sum_rows(self.run_direct(vec![task]).await?)
            }
        };

        info!(table = %self.table, rows, "export finished");

        Ok(())
    }

    async fn close(&mut self) -> BatchResult<()> {
        self.prepared = None;
        Ok(())
    }
}

fn sum_rows(reports: Vec<ExportReport>) -> u64 {
    reports.iter().map(|report| report.rows).sum()
}

/// Fails when the directory export files are written to does not exist.
async fn check_output_dir(first_file: &Path) -> BatchResult<()> {
    let Some(dir) = first_file.parent().filter(|dir| !dir.as_os_str().is_empty()) else {
        return Ok(());
    };

    match tokio::fs::metadata(dir).await {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => bail!(
            ErrorKind::ConfigError,
            "Export path is not a directory",
            dir.display()
        ),
        Err(err) => Err(batch_error!(
            ErrorKind::ConfigError,
            "Export directory does not exist",
            dir.display(),
            source: err
        )),
    }
}
