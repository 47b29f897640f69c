use std::path::PathBuf;
use std::sync::Arc;

use batch_config::shared::{Operation, PipelineConfig, ProducerMode, ShardingConfig, WriteDbConfig};
use tracing::info;

use crate::bail;
use crate::cipher::FieldCipher;
use crate::concurrency::pipeline::EventPipeline;
use crate::concurrency::shutdown::ShutdownRx;
use crate::context::{ConsumerContext, RenderOptions};
use crate::error::{BatchResult, ErrorKind};
use crate::executor::{BatchCommand, Executor, load_metadata};
use crate::file::LineSplitter;
use crate::source::DataSource;
use crate::stats::DebugInfo;
use crate::types::RowEvent;
use crate::workers::consumer::{ConsumerReport, ConsumerWorker};
use crate::workers::pool::{WorkerPool, WorkerType};
use crate::workers::producer::{FileInput, FileProducer, ProducerReport};
use crate::workers::sink::SqlSink;
use crate::workers::strategy::{FlushThresholds, RowStrategy, StrategyKind};

/// Context and strategy resolved by `pre_check`.
#[derive(Debug, Clone)]
struct PreparedWrite {
    context: Arc<ConsumerContext>,
    kind: StrategyKind,
    cipher: Option<Arc<FieldCipher>>,
}

/// Imports or deletes rows read from data files.
///
/// File producers publish rows into the event pipeline, consumers batch them into statements
/// and execute them on their own connections.
pub struct WriteDbExecutor<D> {
    data_source: D,
    command: BatchCommand,
    config: WriteDbConfig,
    pipeline: PipelineConfig,
    sharding: ShardingConfig,
    debug_info: Arc<DebugInfo>,
    shutdown_rx: ShutdownRx,
    prepared: Option<PreparedWrite>,
    running: Option<EventPipeline<RowEvent>>,
}

impl<D> WriteDbExecutor<D>
where
    D: DataSource,
{
    pub fn new(
        data_source: D,
        command: BatchCommand,
        config: WriteDbConfig,
        pipeline: PipelineConfig,
        sharding: ShardingConfig,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            data_source,
            command,
            config,
            pipeline,
            sharding,
            debug_info: DebugInfo::new(),
            shutdown_rx,
            prepared: None,
            running: None,
        }
    }

    fn prepared(&self) -> BatchResult<PreparedWrite> {
        match &self.prepared {
            Some(prepared) => Ok(prepared.clone()),
            None => bail!(
                ErrorKind::InvalidState,
                "Write executed before a successful pre-check"
            ),
        }
    }

    fn thresholds(&self) -> FlushThresholds {
        FlushThresholds::new(self.pipeline.flush_max_rows, self.pipeline.flush_max_bytes)
    }

    fn render_options(&self) -> RenderOptions {
        RenderOptions {
            separator: self.config.separator.clone(),
            with_last_sep: self.config.with_last_sep,
            sql_escape: self.config.sql_escape,
            insert_ignore: self.config.insert_ignore,
            insert_columns: self.config.columns.clone(),
            hint_template: self.sharding.hint_template.clone(),
        }
    }

    async fn check_files(&self) -> BatchResult<()> {
        if self.command.files.is_empty() {
            bail!(
                ErrorKind::ConfigError,
                "No input files given",
                format!("operation {}", self.command.name())
            );
        }

        for path in &self.command.files {
            let is_file = tokio::fs::metadata(path)
                .await
                .map(|metadata| metadata.is_file())
                .unwrap_or(false);
            if !is_file {
                bail!(
                    ErrorKind::ConfigError,
                    "Input file not found",
                    path.display()
                );
            }
        }

        Ok(())
    }
}

impl<D> Executor for WriteDbExecutor<D>
where
    D: DataSource,
{
    fn name(&self) -> &'static str {
        self.command.name()
    }

    fn debug_info(&self) -> Arc<DebugInfo> {
        self.debug_info.clone()
    }

    async fn pre_check(&mut self) -> BatchResult<()> {
        self.config.validate()?;
        self.pipeline.validate()?;
        self.sharding.validate()?;

        let table = self.command.table.clone();
        if table.trim().is_empty() {
            bail!(ErrorKind::ConfigError, "Write needs a table name");
        }

        let sharded = self.command.routes_to_shards(self.sharding.enabled);
        let kind = self.command.strategy_kind(sharded)?;
        self.check_files().await?;
        let cipher = FieldCipher::from_config(&self.config.encryption)?.map(Arc::new);

        let metadata = load_metadata(&self.data_source, &table, sharded).await?;

        let deletes = matches!(
            self.command.operation,
            Operation::Delete | Operation::DeleteIn
        );
        if deletes && metadata.primary_keys.is_empty() {
            bail!(
                ErrorKind::MissingTableMetadata,
                "Delete needs a table with a primary key",
                format!("table `{table}`")
            );
        }

        let mut builder = ConsumerContext::builder()
            .primary_keys(table.clone(), metadata.primary_keys)
            .fields(table.clone(), metadata.fields)
            .where_condition(self.config.where_condition.clone())
            .options(self.render_options());

        if sharded {
            let Some(partition_key) = metadata.partition_key else {
                bail!(
                    ErrorKind::MissingTableMetadata,
                    "Sharded operation needs a partition key",
                    format!("table `{table}`")
                );
            };
            if metadata.topology.is_empty() {
                bail!(
                    ErrorKind::MissingTableMetadata,
                    "Sharded operation found no shards",
                    format!("table `{table}`")
                );
            }

            builder = builder
                .topology(table.clone(), metadata.topology)
                .partition_key(table.clone(), partition_key);
        }

        let context = builder.build()?;
        // Surfaces missing columns or keys before any file is read.
        RowStrategy::bind(kind.clone(), &context, &table, self.thresholds())?;

        self.prepared = Some(PreparedWrite {
            context,
            kind,
            cipher,
        });

        Ok(())
    }

    async fn execute(&mut self) -> BatchResult<()> {
        let prepared = self.prepared()?;
        let table = self.command.table.clone();

        let pipeline =
            EventPipeline::<RowEvent>::new(self.pipeline.ring_buffer_size, self.pipeline.producer_mode)?;
        self.debug_info.set_pipeline(pipeline.probe());
        self.running = Some(pipeline.clone());

        let inputs = assign_inputs(
            &self.command.files,
            self.pipeline.producer_mode,
            self.pipeline.producers,
        );
        // Every publisher and subscriber exists before the first worker can drop one.
        let publishers = inputs
            .iter()
            .map(|_| pipeline.publisher())
            .collect::<BatchResult<Vec<_>>>()?;
        let subscribers: Vec<_> = (0..self.pipeline.consumers)
            .map(|_| pipeline.subscribe())
            .collect();

        let mut consumers =
            WorkerPool::<ConsumerReport>::new(WorkerType::Consumer, subscribers.len());
        self.debug_info.set_latch(consumers.latch());
        let thresholds = self.thresholds();
        let stat_name = self.command.name();

        for (worker_id, subscriber) in subscribers.into_iter().enumerate() {
            let data_source = self.data_source.clone();
            let table = table.clone();
            let kind = prepared.kind.clone();
            let context = prepared.context.clone();
            let debug_info = self.debug_info.clone();
            let shutdown_rx = self.shutdown_rx.clone();

            consumers.spawn(worker_id, async move {
                let conn = data_source.connection().await?;
                let sink = SqlSink::new(conn, table.clone(), stat_name, &debug_info);

                ConsumerWorker::new(
                    worker_id,
                    table,
                    kind,
                    thresholds,
                    context,
                    subscriber,
                    sink,
                    debug_info,
                    shutdown_rx,
                )
                .run()
                .await
            });
        }

        let mut producers = WorkerPool::<ProducerReport>::new(WorkerType::Producer, inputs.len());
        for (worker_id, (files, publisher)) in inputs.into_iter().zip(publishers).enumerate() {
            let producer = FileProducer::new(
                worker_id,
                files,
                self.config.compression,
                LineSplitter::new(self.config.separator.clone(), self.config.with_last_sep),
                self.config.with_header,
                table.clone(),
                publisher,
                self.debug_info.clone(),
                self.shutdown_rx.clone(),
            )
            .with_cipher(prepared.cipher.clone());
            producers.spawn(worker_id, producer.run());
        }

        let produced = producers.wait_all().await;
        let consumed = consumers.wait_all().await;

        let (published, processed) = match (produced, consumed) {
            (Ok(producer_reports), Ok(consumer_reports)) => (
                producer_reports.iter().map(|report| report.rows).sum::<u64>(),
                consumer_reports.iter().map(|report| report.rows).sum::<u64>(),
            ),
            (Err(err), Ok(_)) | (Ok(_), Err(err)) => return Err(err),
            (Err(produce_err), Err(consume_err)) => {
                return Err(vec![produce_err, consume_err].into());
            }
        };

        info!(
            table = %table,
            operation = self.command.name(),
            published,
            processed,
            "write finished"
        );

        Ok(())
    }

    async fn close(&mut self) -> BatchResult<()> {
        if let Some(pipeline) = self.running.take() {
            pipeline.halt();
        }
        self.prepared = None;

        Ok(())
    }
}

/// Distributes input files over producers.
///
/// A single-producer pipeline reads every file through one producer. Otherwise files are dealt
/// round-robin to at most `max_producers` producers.
fn assign_inputs(
    files: &[PathBuf],
    mode: ProducerMode,
    max_producers: usize,
) -> Vec<Vec<FileInput>> {
    let producers = match mode {
        ProducerMode::Single => 1,
        ProducerMode::Multi => max_producers.min(files.len()).max(1),
    };

    let mut groups = vec![Vec::new(); producers];
    for (source, path) in files.iter().enumerate() {
        groups[source % producers].push(FileInput::new(source, path.clone()));
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(count: usize) -> Vec<PathBuf> {
        (0..count)
            .map(|index| PathBuf::from(format!("part_{index}.csv")))
            .collect()
    }

    #[test]
    fn files_are_dealt_round_robin() {
        let groups = assign_inputs(&files(5), ProducerMode::Multi, 2);

        let sources: Vec<Vec<usize>> = groups
            .iter()
            .map(|group| group.iter().map(|input| input.source).collect())
            .collect();
        assert_eq!(sources, vec![vec![0, 2, 4], vec![1, 3]]);
    }

    #[test]
    fn single_mode_uses_one_producer() {
        let groups = assign_inputs(&files(3), ProducerMode::Single, 4);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 3);
    }

    #[test]
    fn producers_never_outnumber_files() {
        assert_eq!(assign_inputs(&files(2), ProducerMode::Multi, 8).len(), 2);
    }
}
