//! Command-line launcher for batch runs against (sharded) MySQL tables.
//!
//! Loads configuration, initializes tracing and metrics, and runs one export, import or delete
//! command until it finishes or is interrupted.

use std::process::ExitCode;

use batch_config::shared::BatchToolConfig;
use batch_telemetry::metrics::init_metrics;
use batch_telemetry::tracing::init_tracing;
use clap::Parser;

use crate::config::{Cli, load_tool_config};
use crate::core::run_tool;
use crate::error::{ToolError, ToolResult};

mod config;
mod core;
mod error;

fn main() -> ExitCode {
    match try_main() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprint!("{}", err.render_report());
            ExitCode::FAILURE
        }
    }
}

fn try_main() -> ToolResult<()> {
    let cli = Cli::parse();
    let config = load_tool_config(&cli)?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME"), cli.log_dir.as_deref())
        .map_err(ToolError::config)?;

    if config.metrics_enabled {
        init_metrics(cli.metrics_port, Some(&config.command.table)).map_err(ToolError::config)?;
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(config))
}

async fn async_main(config: BatchToolConfig) -> ToolResult<()> {
    if let Err(err) = run_tool(config).await {
        tracing::error!("{err}");
        return Err(err);
    }

    Ok(())
}
