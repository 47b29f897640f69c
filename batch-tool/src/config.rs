use std::path::PathBuf;

use batch_config::shared::{BatchToolConfig, Operation};
use batch_config::{load_config, load_config_from};
use clap::{Parser, ValueEnum};

use crate::error::{ToolError, ToolResult};

/// Operation selected on the command line.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OperationArg {
    Export,
    Import,
    Delete,
    DeleteIn,
}

impl From<OperationArg> for Operation {
    fn from(arg: OperationArg) -> Self {
        match arg {
            OperationArg::Export => Operation::Export,
            OperationArg::Import => Operation::Import,
            OperationArg::Delete => Operation::Delete,
            OperationArg::DeleteIn => Operation::DeleteIn,
        }
    }
}

/// Bulk export, import and delete for (sharded) MySQL tables.
///
/// Settings are read from `configuration/base.yaml`, the `BATCH_ENVIRONMENT` file and `BATCH_`
/// environment variables; the flags below override them.
#[derive(Debug, Parser)]
#[command(name = "batch-tool", version)]
pub struct Cli {
    /// Directory holding the configuration files.
    #[arg(long)]
    pub config_dir: Option<PathBuf>,

    /// Operation to run.
    #[arg(short, long, value_enum)]
    pub operation: Option<OperationArg>,

    /// Logical table to operate on.
    #[arg(short, long)]
    pub table: Option<String>,

    /// Input data file; repeat for several files.
    #[arg(short = 'f', long = "file")]
    pub files: Vec<String>,

    /// Number of consumer workers.
    #[arg(short, long)]
    pub consumers: Option<usize>,

    /// Export directory (or path prefix).
    #[arg(long)]
    pub path: Option<String>,

    /// Write logs into daily files in this directory instead of stdout.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Port of the Prometheus endpoint when metrics are enabled.
    #[arg(long, default_value_t = 9000)]
    pub metrics_port: u16,
}

impl Cli {
    /// Applies command-line overrides to the loaded configuration.
    fn apply(&self, config: &mut BatchToolConfig) {
        if let Some(operation) = self.operation {
            config.command.operation = operation.into();
        }
        if let Some(table) = &self.table {
            config.command.table = table.clone();
        }
        if !self.files.is_empty() {
            config.command.files = self.files.clone();
        }
        if let Some(consumers) = self.consumers {
            config.pipeline.consumers = consumers;
        }
        if let Some(path) = &self.path {
            config.export.path = path.clone();
        }
    }
}

/// Loads the configuration, applies command-line overrides and validates the result.
pub fn load_tool_config(cli: &Cli) -> ToolResult<BatchToolConfig> {
    let mut config = match &cli.config_dir {
        Some(directory) => load_config_from::<BatchToolConfig>(directory),
        None => load_config::<BatchToolConfig>(),
    }
    .map_err(ToolError::config)?;

    cli.apply(&mut config);
    config.validate().map_err(ToolError::config)?;

    Ok(config)
}
