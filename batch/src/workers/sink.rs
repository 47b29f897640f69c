//! Destinations of strategy flushes.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{debug, error};

use crate::bail;
use crate::error::{BatchResult, ErrorKind};
use crate::file::ExportFileWriter;
use crate::metrics::{
    BATCH_ERRORS_TOTAL, BATCH_STATEMENT_DURATION_SECONDS, BATCH_STATEMENTS_TOTAL, ERROR_KIND_LABEL,
    GROUP_LABEL, TABLE_NAME_LABEL,
};
use crate::source::Connection;
use crate::stats::{DebugInfo, SqlStat};
use crate::workers::strategy::Flush;

/// Receives the flushes of one worker.
pub trait FlushSink: Send + 'static {
    /// Applies one flush.
    fn write(&mut self, flush: Flush) -> impl Future<Output = BatchResult<()>> + Send;

    /// Releases the sink's resources.
    fn close(self) -> impl Future<Output = BatchResult<()>> + Send;
}

/// Executes statement flushes on a dedicated connection and times each statement.
#[derive(Debug)]
pub struct SqlSink<C> {
    conn: C,
    table: String,
    stat: Arc<SqlStat>,
}

impl<C> SqlSink<C>
where
    C: Connection,
{
    /// Statement timings are recorded under `stat_name` in `debug_info`.
    pub fn new(conn: C, table: impl Into<String>, stat_name: &str, debug_info: &DebugInfo) -> Self {
        Self {
            conn,
            table: table.into(),
            stat: debug_info.sql_stat(stat_name),
        }
    }
}

impl<C> FlushSink for SqlSink<C>
where
    C: Connection,
{
    async fn write(&mut self, flush: Flush) -> BatchResult<()> {
        let Flush::Sql {
            statement,
            rows,
            group,
        } = flush
        else {
            bail!(
                ErrorKind::InvalidState,
                "Statement sink received file data"
            );
        };

        let group = group.unwrap_or_default();
        let started = Instant::now();
        let result = self.conn.execute(&statement).await;
        let elapsed = started.elapsed();

        match result {
            Ok(affected) => {
                self.stat.add_time(elapsed);
                counter!(
                    BATCH_STATEMENTS_TOTAL,
                    TABLE_NAME_LABEL => self.table.clone(),
                    GROUP_LABEL => group.clone(),
                )
                .increment(1);
                histogram!(
                    BATCH_STATEMENT_DURATION_SECONDS,
                    TABLE_NAME_LABEL => self.table.clone(),
                )
                .record(elapsed.as_secs_f64());
                debug!(table = %self.table, group = %group, rows, affected, "statement executed");

                Ok(())
            }
            Err(err) => {
                counter!(
                    BATCH_ERRORS_TOTAL,
                    TABLE_NAME_LABEL => self.table.clone(),
                    ERROR_KIND_LABEL => format!("{:?}", err.kind()),
                )
                .increment(1);
                error!(table = %self.table, group = %group, rows, error = %err, "statement failed");

                Err(err)
            }
        }
    }

    async fn close(self) -> BatchResult<()> {
        self.conn.close().await
    }
}

/// Writes byte flushes into the export files of one worker.
pub struct FileSink {
    writer: ExportFileWriter,
    debug_info: Arc<DebugInfo>,
}

impl FileSink {
    pub fn new(writer: ExportFileWriter, debug_info: Arc<DebugInfo>) -> Self {
        Self { writer, debug_info }
    }
}

impl FlushSink for FileSink {
    async fn write(&mut self, flush: Flush) -> BatchResult<()> {
        match flush {
            Flush::Bytes { bytes, rows } => self.writer.write_chunk(&bytes, rows).await,
            Flush::Sql { .. } => bail!(ErrorKind::InvalidState, "File sink received a statement"),
        }
    }

    async fn close(self) -> BatchResult<()> {
        for stat in self.writer.finish().await? {
            self.debug_info.add_file_stat(stat);
        }

        Ok(())
    }
}
