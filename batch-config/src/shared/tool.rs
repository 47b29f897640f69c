use serde::{Deserialize, Serialize};

use crate::load::Config;
use crate::shared::{
    ExportConfig, MySqlConnectionConfig, PipelineConfig, ValidationError, WriteDbConfig,
};

/// Routing hint rendered in front of statements aimed at one physical shard.
pub const DEFAULT_HINT_TEMPLATE: &str = "/!TDDL:node='{group}'*/";

/// Placeholder replaced by the shard group name in [`ShardingConfig::hint_template`].
pub const HINT_GROUP_PLACEHOLDER: &str = "{group}";

/// The kind of batch operation a run performs.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Table rows to data files.
    Export,
    /// Data file rows into a table.
    Import,
    /// One statement per row, keyed by the primary key values found in data files.
    Delete,
    /// Primary keys from data files, deleted in batches with `IN (...)`.
    DeleteIn,
}

impl Operation {
    /// Returns whether the operation reads data files and writes to the database.
    pub fn writes_database(&self) -> bool {
        !matches!(self, Operation::Export)
    }
}

/// Identifies what a run operates on.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CommandConfig {
    pub operation: Operation,
    /// Logical table name.
    pub table: String,
    /// Input data files for import and delete.
    #[serde(default)]
    pub files: Vec<String>,
}

impl CommandConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.table.trim().is_empty() {
            return Err(ValidationError::MissingField("command.table".to_string()));
        }

        if self.operation.writes_database() && self.files.is_empty() {
            return Err(ValidationError::MissingField("command.files".to_string()));
        }

        Ok(())
    }
}

/// Shard-aware routing settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ShardingConfig {
    /// Route statements per physical shard using the table topology.
    #[serde(default)]
    pub enabled: bool,
    /// Statement prefix selecting a shard; `{group}` is replaced by the group name.
    #[serde(default = "default_hint_template")]
    pub hint_template: String,
}

impl ShardingConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.enabled && !self.hint_template.contains(HINT_GROUP_PLACEHOLDER) {
            return Err(ValidationError::invalid(
                "sharding.hint_template",
                format!("must contain the `{HINT_GROUP_PLACEHOLDER}` placeholder"),
            ));
        }

        Ok(())
    }
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            hint_template: default_hint_template(),
        }
    }
}

fn default_hint_template() -> String {
    DEFAULT_HINT_TEMPLATE.to_string()
}

/// Root configuration of the batch tool.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BatchToolConfig {
    pub connection: MySqlConnectionConfig,
    pub command: CommandConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub sharding: ShardingConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub write: WriteDbConfig,
    /// Expose Prometheus metrics while the run is in progress.
    #[serde(default)]
    pub metrics_enabled: bool,
}

impl BatchToolConfig {
    /// Validates every section relevant to the configured operation.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.connection.validate()?;
        self.command.validate()?;
        self.pipeline.validate()?;
        self.sharding.validate()?;

        self.validate_pool_size()?;

        if self.command.operation.writes_database() {
            self.write.validate()
        } else {
            self.export.validate()
        }
    }

    /// Checks that every worker holding a connection for the whole run gets one.
    ///
    /// Write consumers keep their connection until the pipeline drains; export workers keep
    /// theirs until their query is streamed, and at most `pipeline.producers` run at once.
    fn validate_pool_size(&self) -> Result<(), ValidationError> {
        let max_connections = self.connection.max_connections as usize;
        let (field, holders) = if self.command.operation.writes_database() {
            ("pipeline.consumers", self.pipeline.consumers)
        } else {
            ("pipeline.producers", self.pipeline.producers)
        };

        if holders > max_connections {
            return Err(ValidationError::invalid(
                field,
                format!("{holders} exceeds `connection.max_connections` ({max_connections})"),
            ));
        }

        Ok(())
    }
}

impl Config for BatchToolConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] =
        &["command.files", "export.order_by", "write.columns"];
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "connection": {"host": "localhost", "name": "shop", "username": "batch"},
        "command": {"operation": "delete_in", "table": "orders", "files": ["orders.csv"]}
    }"#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config: BatchToolConfig = serde_json::from_str(MINIMAL).unwrap();

        assert!(config.validate().is_ok());
        assert!(!config.sharding.enabled);
        assert_eq!(config.sharding.hint_template, DEFAULT_HINT_TEMPLATE);
        assert_eq!(config.write.separator, ",");
    }

    #[test]
    fn write_operations_need_files() {
        let mut config: BatchToolConfig = serde_json::from_str(MINIMAL).unwrap();
        config.command.files.clear();

        assert_eq!(
            config.validate(),
            Err(ValidationError::MissingField("command.files".to_string()))
        );
    }

    #[test]
    fn consumers_must_fit_the_connection_pool() {
        let mut config: BatchToolConfig = serde_json::from_str(MINIMAL).unwrap();
        config.connection.max_connections = 8;
        config.pipeline.consumers = 9;

        assert_eq!(
            config.validate(),
            Err(ValidationError::invalid(
                "pipeline.consumers",
                "9 exceeds `connection.max_connections` (8)"
            ))
        );

        config.pipeline.consumers = 8;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn export_producers_must_fit_the_connection_pool() {
        let mut config: BatchToolConfig = serde_json::from_str(MINIMAL).unwrap();
        config.command.operation = Operation::Export;
        config.connection.max_connections = 2;
        config.pipeline.consumers = 16;
        config.pipeline.producers = 3;

        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidFieldValue { field, .. }) if field == "pipeline.producers"
        ));

        config.pipeline.producers = 2;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn hint_template_needs_placeholder() {
        let sharding = ShardingConfig {
            enabled: true,
            hint_template: "/*+ node */".to_string(),
        };

        assert!(sharding.validate().is_err());
    }
}
