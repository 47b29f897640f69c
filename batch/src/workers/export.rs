//! Direct export workers.
//!
//! A direct export worker owns one connection and one [`ExportFileWriter`]. It streams a select
//! straight into its files; no pipeline is involved.

use std::sync::Arc;

use futures::StreamExt;
use metrics::counter;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::batch_error;
use crate::bail;
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{BatchResult, ErrorKind};
use crate::file::{ExportFileWriter, FileTarget, RowFormatter};
use crate::metrics::{BATCH_ROWS_PROCESSED_TOTAL, TABLE_NAME_LABEL, WORKER_TYPE_LABEL};
use crate::source::{Connection, DataSource};
use crate::sql::{OrderBy, render_count, render_select};
use crate::stats::{DebugInfo, FileReaderStat};
use crate::types::FieldMetaInfo;

/// What one direct export worker selects and where it writes.
#[derive(Debug, Clone)]
pub struct ExportTask {
    /// Table the select runs against: the logical table, or one physical shard.
    pub query_table: String,
    /// Routing hint of the shard, when exporting a single shard.
    pub hint: Option<String>,
    pub fields: Vec<FieldMetaInfo>,
    pub where_condition: Option<String>,
    pub order_by: Option<OrderBy>,
    /// Rows per file; `None` writes a single file.
    pub max_rows: Option<u64>,
    pub target: FileTarget,
    pub formatter: RowFormatter,
    pub with_header: bool,
}

impl ExportTask {
    pub fn select_sql(&self) -> String {
        render_select(
            self.hint.as_deref(),
            &self.query_table,
            &self.fields,
            self.where_condition.as_deref(),
            self.order_by.as_ref(),
        )
    }
}

/// Outcome of a direct export worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub index: usize,
    pub rows: u64,
    pub files: Vec<FileReaderStat>,
}

/// Rows per file when `total` rows are split into `file_count` files.
///
/// Every file but the last holds exactly this many rows.
pub fn fixed_file_threshold(total: u64, file_count: u64) -> u64 {
    total.div_ceil(file_count.max(1))
}

/// Counts the rows an export will select.
///
/// Any failure is reported as [`ErrorKind::RowCountUnavailable`], which aborts the run: without
/// the count the rows cannot be split into the requested number of files.
pub async fn count_rows<C: Connection>(
    conn: &mut C,
    table: &str,
    where_condition: Option<&str>,
) -> BatchResult<u64> {
    let sql = render_count(None, table, where_condition);

    conn.fetch_count(&sql).await.map_err(|err| {
        batch_error!(
            ErrorKind::RowCountUnavailable,
            "Could not count rows for a fixed-file-count export",
            format!("table `{table}`"),
            source: err
        )
    })
}

/// Streams one [`ExportTask`] into its files.
pub struct DirectExportWorker<D> {
    index: usize,
    table: String,
    task: ExportTask,
    data_source: D,
    permits: Arc<Semaphore>,
    debug_info: Arc<DebugInfo>,
    shutdown_rx: ShutdownRx,
}

impl<D> DirectExportWorker<D>
where
    D: DataSource,
{
    pub fn new(
        index: usize,
        table: impl Into<String>,
        task: ExportTask,
        data_source: D,
        permits: Arc<Semaphore>,
        debug_info: Arc<DebugInfo>,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            index,
            table: table.into(),
            task,
            data_source,
            permits,
            debug_info,
            shutdown_rx,
        }
    }

    pub async fn run(self) -> BatchResult<ExportReport> {
        let _permit = self.permits.clone().acquire_owned().await.map_err(|err| {
            batch_error!(
                ErrorKind::InvalidState,
                "Export permits were closed",
                err
            )
        })?;

        let mut conn = self.data_source.connection().await?;
        let result = self.export(&mut conn).await;
        if let Err(err) = conn.close().await {
            warn!(index = self.index, error = %err, "failed to close export connection");
        }

        let report = result?;
        for stat in &report.files {
            self.debug_info.add_file_stat(stat.clone());
        }

        info!(
            index = self.index,
            table = %self.table,
            rows = report.rows,
            files = report.files.len(),
            "export worker finished"
        );

        Ok(report)
    }

    async fn export(&self, conn: &mut D::Connection) -> BatchResult<ExportReport> {
        let header = self
            .task
            .with_header
            .then(|| self.task.formatter.header_line(&self.task.fields));
        let mut writer = ExportFileWriter::new(self.task.target.clone(), header, self.task.max_rows);

        let sql = self.task.select_sql();
        debug!(index = self.index, sql = %sql, "starting export query");

        let mut rows = 0u64;
        let mut line = Vec::new();
        let mut stream = conn.fetch_rows(&sql);
        while let Some(row) = stream.next().await {
            if self.shutdown_rx.is_shutdown() {
                bail!(
                    ErrorKind::OperationCancelled,
                    "Export stopped by shutdown",
                    format!("worker {}", self.index)
                );
            }

            let row = row?;
            line.clear();
            self.task.formatter.format_values(row.values(), &mut line)?;
            writer.write_row(&line).await?;

            rows += 1;
            self.debug_info.rows_processed(1, false);
        }
        drop(stream);

        let files = writer.finish().await?;
        counter!(
            BATCH_ROWS_PROCESSED_TOTAL,
            TABLE_NAME_LABEL => self.table.clone(),
            WORKER_TYPE_LABEL => "export",
        )
        .increment(rows);

        Ok(ExportReport {
            index: self.index,
            rows,
            files,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_file_threshold_rounds_up() {
        assert_eq!(fixed_file_threshold(1000, 3), 334);
        assert_eq!(fixed_file_threshold(999, 3), 333);
        assert_eq!(fixed_file_threshold(0, 3), 0);
        assert_eq!(fixed_file_threshold(5, 0), 5);
    }
}
