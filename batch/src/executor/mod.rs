//! Batch executors.
//!
//! Every operation runs as an [`Executor`] through [`run_executor`]: `pre_check` rejects bad
//! commands before any data moves, `execute` runs the workers, `close` always runs last.

mod base;
mod command;
mod export;
mod write_db;

pub use base::*;
pub use command::*;
pub use export::*;
pub use write_db::*;

use batch_config::shared::{BatchToolConfig, Operation};
use tracing::warn;

use crate::concurrency::shutdown::ShutdownRx;
use crate::error::BatchResult;
use crate::source::metadata::{TableMetadata, load_table_metadata};
use crate::source::{Connection, DataSource};

/// Loads the metadata of `table` on a connection of its own.
pub(crate) async fn load_metadata<D: DataSource>(
    data_source: &D,
    table: &str,
    sharded: bool,
) -> BatchResult<TableMetadata> {
    let mut conn = data_source.connection().await?;
    let metadata =
        load_table_metadata(&mut conn, data_source.schema_name(), table, sharded).await;
    if let Err(err) = conn.close().await {
        warn!(table, error = %err, "failed to close metadata connection");
    }

    metadata
}

/// Builds the executor for `command` and runs it to completion.
pub async fn run_batch<D: DataSource>(
    config: &BatchToolConfig,
    command: BatchCommand,
    data_source: D,
    shutdown_rx: ShutdownRx,
) -> RunReport {
    match command.operation {
        Operation::Export => {
            let executor = ExportExecutor::new(
                data_source,
                command.table,
                config.export.clone(),
                config.pipeline.clone(),
                config.sharding.clone(),
                shutdown_rx,
            );
            run_executor(executor).await
        }
        Operation::Import | Operation::Delete | Operation::DeleteIn => {
            let executor = WriteDbExecutor::new(
                data_source,
                command,
                config.write.clone(),
                config.pipeline.clone(),
                config.sharding.clone(),
                shutdown_rx,
            );
            run_executor(executor).await
        }
    }
}
