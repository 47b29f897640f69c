//! Metric names and labels emitted by batch runs.
//!
//! Metrics go through the `metrics` facade. Without an installed recorder every emission is a
//! no-op, so library users only pay for them when they opt in.

/// Label for the logical table name.
pub const TABLE_NAME_LABEL: &str = "table_name";

/// Label for the operation of the run (`export`, `import`, `delete`, `delete_in`).
pub const OPERATION_LABEL: &str = "operation";

/// Label for the kind of worker emitting the metric.
pub const WORKER_TYPE_LABEL: &str = "worker_type";

/// Label for the shard group a statement was routed to.
pub const GROUP_LABEL: &str = "group";

/// Label for error kinds.
pub const ERROR_KIND_LABEL: &str = "error_kind";

/// Counter of rows published into the event pipeline.
pub const BATCH_ROWS_PUBLISHED_TOTAL: &str = "batch_rows_published_total";

/// Counter of rows handed to a strategy by consumers or export workers.
pub const BATCH_ROWS_PROCESSED_TOTAL: &str = "batch_rows_processed_total";

/// Counter of SQL statements executed against the target.
pub const BATCH_STATEMENTS_TOTAL: &str = "batch_statements_total";

/// Counter of failed SQL statements or file writes.
pub const BATCH_ERRORS_TOTAL: &str = "batch_errors_total";

/// Histogram of statement execution time.
pub const BATCH_STATEMENT_DURATION_SECONDS: &str = "batch_statement_duration_seconds";

/// Counter of data files opened for writing.
pub const BATCH_FILES_WRITTEN_TOTAL: &str = "batch_files_written_total";

/// Gauge of events published but not yet claimed.
pub const BATCH_PIPELINE_DEPTH: &str = "batch_pipeline_depth";

/// Histogram of the total duration of `Executor::execute`.
pub const BATCH_RUN_DURATION_SECONDS: &str = "batch_run_duration_seconds";
