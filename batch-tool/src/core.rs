use batch::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use batch::executor::{BatchCommand, run_batch};
use batch::source::MySqlDataSource;
use batch_config::shared::{BatchToolConfig, ExportConfig, PipelineConfig, WriteDbConfig};
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::ToolResult;

/// Connects to the database and runs the configured command to completion.
///
/// Ctrl+C or SIGTERM stops the run: producers stop reading, consumers flush what they already
/// claimed and the run reports a cancellation.
pub async fn run_tool(config: BatchToolConfig) -> ToolResult<()> {
    let command = BatchCommand::from(&config.command);
    info!(
        operation = command.name(),
        table = %command.table,
        files = command.files.len(),
        "starting batch run"
    );

    log_config(&config);

    let data_source = MySqlDataSource::connect(&config.connection).await?;

    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let shutdown_handle = spawn_signal_listener(shutdown_tx);

    let report = run_batch(&config, command, data_source.clone(), shutdown_rx).await;

    // If the run finished before a signal arrived, the listener is still waiting.
    shutdown_handle.abort();
    let _ = shutdown_handle.await;

    data_source.close().await;

    report.log();
    println!("{report}");

    report.result.map_err(Into::into)
}

fn spawn_signal_listener(shutdown_tx: ShutdownTx) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                error!(error = %err, "failed to register sigterm handler, only ctrl+c stops the run");
                if let Err(err) = tokio::signal::ctrl_c().await {
                    error!(error = %err, "failed to listen for ctrl+c");
                    return;
                }
                info!("sigint (ctrl+c) received, stopping batch run");
                notify_shutdown(&shutdown_tx);
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("sigint (ctrl+c) received, stopping batch run");
            }
            _ = sigterm.recv() => {
                info!("sigterm received, stopping batch run");
            }
        }

        notify_shutdown(&shutdown_tx);
    })
}

fn notify_shutdown(shutdown_tx: &ShutdownTx) {
    if let Err(err) = shutdown_tx.shutdown() {
        warn!(error = ?err, "failed to send shutdown signal");
    }
}

fn log_config(config: &BatchToolConfig) {
    debug!(
        host = %config.connection.host,
        port = config.connection.port,
        database = %config.connection.name,
        max_connections = config.connection.max_connections,
        "using connection config"
    );
    log_pipeline_config(&config.pipeline);
    debug!(
        enabled = config.sharding.enabled,
        hint_template = %config.sharding.hint_template,
        "using sharding config"
    );

    if config.command.operation.writes_database() {
        log_write_config(&config.write);
    } else {
        log_export_config(&config.export);
    }
}

fn log_pipeline_config(config: &PipelineConfig) {
    debug!(
        ring_buffer_size = config.ring_buffer_size,
        producer_mode = ?config.producer_mode,
        producers = config.producers,
        consumers = config.consumers,
        flush_max_rows = config.flush_max_rows,
        flush_max_bytes = config.flush_max_bytes,
        "using pipeline config"
    );
}

fn log_export_config(config: &ExportConfig) {
    debug!(
        way = ?config.way,
        quote_mode = ?config.quote_mode,
        compression = ?config.compression,
        with_header = config.with_header,
        order_by = ?config.order_by,
        path = %config.path,
        encryption = ?config.encryption.mode,
        masked_columns = ?config.masks.keys().collect::<Vec<_>>(),
        "using export config"
    );
}

fn log_write_config(config: &WriteDbConfig) {
    debug!(
        separator = %config.separator,
        with_header = config.with_header,
        with_last_sep = config.with_last_sep,
        insert_ignore = config.insert_ignore,
        sql_escape = config.sql_escape,
        columns = ?config.columns,
        compression = ?config.compression,
        encryption = ?config.encryption.mode,
        "using write config"
    );
}
