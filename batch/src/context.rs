//! Read-only per-run table metadata shared by every consumer and export worker.

use std::collections::HashMap;
use std::sync::Arc;

use batch_config::shared::{DEFAULT_HINT_TEMPLATE, DEFAULT_SEPARATOR, HINT_GROUP_PLACEHOLDER};

use crate::bail;
use crate::error::{BatchResult, ErrorKind};
use crate::types::{FieldMetaInfo, PartitionKey, PrimaryKey, TableTopology};

/// Options controlling how rows are split and how statements are rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    /// Field separator of data files.
    pub separator: String,
    /// Lines end with a separator that does not start a new field.
    pub with_last_sep: bool,
    /// Escape string values before inlining them into SQL.
    pub sql_escape: bool,
    /// Render `INSERT IGNORE`.
    pub insert_ignore: bool,
    /// Explicit insert column list; empty means all columns in table order.
    pub insert_columns: Vec<String>,
    /// Routing hint template containing [`HINT_GROUP_PLACEHOLDER`].
    pub hint_template: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR.to_string(),
            with_last_sep: false,
            sql_escape: true,
            insert_ignore: false,
            insert_columns: Vec::new(),
            hint_template: DEFAULT_HINT_TEMPLATE.to_string(),
        }
    }
}

/// Table metadata and rendering options of one run.
///
/// Built once through [`ConsumerContextBuilder`] before any worker starts and shared as
/// `Arc<ConsumerContext>`. There are no mutating methods.
#[derive(Debug, Default)]
pub struct ConsumerContext {
    primary_keys: HashMap<String, Vec<PrimaryKey>>,
    fields: HashMap<String, Vec<FieldMetaInfo>>,
    topologies: HashMap<String, Vec<TableTopology>>,
    partition_keys: HashMap<String, PartitionKey>,
    where_condition: Option<String>,
    options: RenderOptions,
}

impl ConsumerContext {
    pub fn builder() -> ConsumerContextBuilder {
        ConsumerContextBuilder::default()
    }

    /// Primary key columns of `table`, in key order.
    pub fn primary_keys(&self, table: &str) -> BatchResult<&[PrimaryKey]> {
        match self.primary_keys.get(table) {
            Some(keys) if !keys.is_empty() => Ok(keys),
            _ => bail!(
                ErrorKind::MissingTableMetadata,
                "Table has no primary key",
                format!("table `{table}`")
            ),
        }
    }

    /// Columns of `table`, in table order.
    pub fn fields(&self, table: &str) -> BatchResult<&[FieldMetaInfo]> {
        match self.fields.get(table) {
            Some(fields) if !fields.is_empty() => Ok(fields),
            _ => bail!(
                ErrorKind::MissingTableMetadata,
                "Table has no column metadata",
                format!("table `{table}`")
            ),
        }
    }

    /// Physical shards of `table`; empty for unsharded tables.
    pub fn topology(&self, table: &str) -> &[TableTopology] {
        self.topologies
            .get(table)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn partition_key(&self, table: &str) -> BatchResult<&PartitionKey> {
        match self.partition_keys.get(table) {
            Some(key) => Ok(key),
            None => bail!(
                ErrorKind::MissingTableMetadata,
                "Sharded table has no partition key",
                format!("table `{table}`")
            ),
        }
    }

    pub fn where_condition(&self) -> Option<&str> {
        self.where_condition.as_deref()
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    /// Renders the routing hint for `group_name`.
    pub fn routing_hint(&self, group_name: &str) -> String {
        self.options
            .hint_template
            .replace(HINT_GROUP_PLACEHOLDER, group_name)
    }
}

/// Collects the metadata of a [`ConsumerContext`].
#[derive(Debug, Default)]
pub struct ConsumerContextBuilder {
    context: ConsumerContext,
}

impl ConsumerContextBuilder {
    pub fn primary_keys(mut self, table: impl Into<String>, keys: Vec<PrimaryKey>) -> Self {
        self.context.primary_keys.insert(table.into(), keys);
        self
    }

    pub fn fields(mut self, table: impl Into<String>, fields: Vec<FieldMetaInfo>) -> Self {
        self.context.fields.insert(table.into(), fields);
        self
    }

    pub fn topology(mut self, table: impl Into<String>, topology: Vec<TableTopology>) -> Self {
        self.context.topologies.insert(table.into(), topology);
        self
    }

    pub fn partition_key(mut self, table: impl Into<String>, key: PartitionKey) -> Self {
        self.context.partition_keys.insert(table.into(), key);
        self
    }

    pub fn where_condition(mut self, where_condition: Option<String>) -> Self {
        self.context.where_condition = where_condition.filter(|w| !w.trim().is_empty());
        self
    }

    pub fn options(mut self, options: RenderOptions) -> Self {
        self.context.options = options;
        self
    }

    /// Freezes the context.
    ///
    /// Fails when a table's partition size does not match the number of its shards, since rows
    /// would then be routed to shards that do not exist.
    pub fn build(self) -> BatchResult<Arc<ConsumerContext>> {
        for (table, key) in &self.context.partition_keys {
            let shards = self.context.topology(table).len();
            if shards != key.partition_size() {
                bail!(
                    ErrorKind::ConfigError,
                    "Partition rule does not match table topology",
                    format!(
                        "table `{table}` has {shards} shards but its rule defines {} partitions",
                        key.partition_size()
                    )
                );
            }
        }

        Ok(Arc::new(self.context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldType;

    #[test]
    fn missing_metadata_is_reported() {
        let context = ConsumerContext::builder().build().unwrap();

        let err = context.primary_keys("orders").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingTableMetadata);
        assert!(context.topology("orders").is_empty());
    }

    #[test]
    fn topology_must_cover_partitions() {
        let key = PartitionKey {
            field: FieldMetaInfo::new("id", FieldType::Int, 0),
            db_partition_count: 2,
            tb_partition_count: 1,
        };

        let err = ConsumerContext::builder()
            .topology("orders", vec![TableTopology::new("g0", "orders_0")])
            .partition_key("orders", key)
            .build()
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }

    #[test]
    fn hint_replaces_group() {
        let context = ConsumerContext::builder()
            .where_condition(Some("  ".to_string()))
            .build()
            .unwrap();

        assert_eq!(
            context.routing_hint("GROUP_0"),
            "/!TDDL:node='GROUP_0'*/"
        );
        assert_eq!(context.where_condition(), None);
    }
}
