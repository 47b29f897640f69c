use std::path::PathBuf;

use batch_config::shared::{CommandConfig, Operation};

use crate::bail;
use crate::error::{BatchResult, ErrorKind};
use crate::workers::strategy::StrategyKind;

/// What a run does and to which table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchCommand {
    pub operation: Operation,
    pub table: String,
    /// Input data files of import and delete runs.
    pub files: Vec<PathBuf>,
}

impl BatchCommand {
    pub fn new(operation: Operation, table: impl Into<String>, files: Vec<PathBuf>) -> Self {
        Self {
            operation,
            table: table.into(),
            files,
        }
    }

    /// Name used for logs, metrics and statement statistics.
    pub fn name(&self) -> &'static str {
        operation_name(self.operation)
    }

    /// The consumer strategy that applies this command's rows.
    ///
    /// Single-row deletes are never routed: they go to the logical table even when sharding is
    /// enabled.
    pub fn strategy_kind(&self, sharded: bool) -> BatchResult<StrategyKind> {
        let kind = match (self.operation, sharded) {
            (Operation::Delete, _) => StrategyKind::SingleDelete,
            (Operation::DeleteIn, false) => StrategyKind::DeleteIn,
            (Operation::DeleteIn, true) => StrategyKind::ShardedDeleteIn,
            (Operation::Import, false) => StrategyKind::Insert,
            (Operation::Import, true) => StrategyKind::ShardedInsert,
            (Operation::Export, _) => bail!(
                ErrorKind::UnsupportedOperation,
                "Export does not write rows to the database"
            ),
        };

        Ok(kind)
    }

    /// Whether the command's rows are routed to shards.
    pub fn routes_to_shards(&self, sharding_enabled: bool) -> bool {
        sharding_enabled && self.operation != Operation::Delete
    }
}

impl From<&CommandConfig> for BatchCommand {
    fn from(config: &CommandConfig) -> Self {
        Self {
            operation: config.operation,
            table: config.table.clone(),
            files: config.files.iter().map(PathBuf::from).collect(),
        }
    }
}

pub(crate) fn operation_name(operation: Operation) -> &'static str {
    match operation {
        Operation::Export => "export",
        Operation::Import => "import",
        Operation::Delete => "delete",
        Operation::DeleteIn => "delete_in",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategies_follow_operation_and_sharding() {
        let delete_in = BatchCommand::new(Operation::DeleteIn, "t", Vec::new());
        assert!(matches!(
            delete_in.strategy_kind(true).unwrap(),
            StrategyKind::ShardedDeleteIn
        ));
        assert!(matches!(
            delete_in.strategy_kind(false).unwrap(),
            StrategyKind::DeleteIn
        ));

        let delete = BatchCommand::new(Operation::Delete, "t", Vec::new());
        assert!(matches!(
            delete.strategy_kind(true).unwrap(),
            StrategyKind::SingleDelete
        ));
        assert!(!delete.routes_to_shards(true));

        let export = BatchCommand::new(Operation::Export, "t", Vec::new());
        assert_eq!(
            export.strategy_kind(false).unwrap_err().kind(),
            ErrorKind::UnsupportedOperation
        );
    }
}
