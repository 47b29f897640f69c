use crate::sql::{escape_sql, quote_identifier};
use crate::test_utils::source::MemoryDataSource;

/// A table as the metadata queries see it.
#[derive(Debug, Clone, Default)]
pub struct TableFixture {
    pub name: String,
    /// `(column, data type)` in table order.
    pub columns: Vec<(String, String)>,
    pub primary_keys: Vec<String>,
    /// `(group, physical table)` in topology order.
    pub shards: Vec<(String, String)>,
    /// `(partition column, database partitions, table partitions)`.
    pub partition: Option<(String, usize, usize)>,
}

impl TableFixture {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn column(mut self, name: &str, data_type: &str) -> Self {
        self.columns.push((name.to_string(), data_type.to_string()));
        self
    }

    pub fn primary_key(mut self, name: &str) -> Self {
        self.primary_keys.push(name.to_string());
        self
    }

    pub fn shard(mut self, group: &str, table: &str) -> Self {
        self.shards.push((group.to_string(), table.to_string()));
        self
    }

    pub fn partition(mut self, column: &str, db_partitions: usize, tb_partitions: usize) -> Self {
        self.partition = Some((column.to_string(), db_partitions, tb_partitions));
        self
    }

    /// `id int, name varchar` with `id` as primary key.
    pub fn id_name(name: &str) -> Self {
        Self::new(name)
            .column("id", "int")
            .column("name", "varchar")
            .primary_key("id")
    }

    /// Registers the answers to every metadata query of this table on `source`.
    pub fn register(&self, source: &MemoryDataSource) {
        let table = escape_sql(&self.name);
        let positions: Vec<String> = (1..=self.columns.len()).map(|i| i.to_string()).collect();

        let column_rows = |keys_only: bool| -> Vec<Vec<Option<&str>>> {
            self.columns
                .iter()
                .zip(&positions)
                .filter(|((name, _), _)| !keys_only || self.primary_keys.contains(name))
                .map(|((name, data_type), position)| {
                    vec![
                        Some(name.as_str()),
                        Some(data_type.as_str()),
                        Some(position.as_str()),
                    ]
                })
                .collect()
        };
        let column_names = ["COLUMN_NAME", "DATA_TYPE", "ORDINAL_POSITION"];

        source.on_query(
            &format!("TABLE_NAME='{table}' AND COLUMN_KEY='PRI'"),
            &column_names,
            column_rows(true),
        );
        source.on_query(
            &format!("TABLE_NAME='{table}' ORDER BY"),
            &column_names,
            column_rows(false),
        );

        let identifier = quote_identifier(&self.name);
        source.on_query(
            &format!("SHOW TOPOLOGY FROM {identifier};"),
            &["ID", "GROUP_NAME", "TABLE_NAME"],
            self.shards
                .iter()
                .map(|(group, physical)| vec![None, Some(group.as_str()), Some(physical.as_str())])
                .collect(),
        );

        if let Some((column, db_partitions, tb_partitions)) = &self.partition {
            let db_partitions = db_partitions.to_string();
            let tb_partitions = tb_partitions.to_string();
            source.on_query(
                &format!("SHOW RULE FROM {identifier};"),
                &[
                    "TABLE_NAME",
                    "DB_PARTITION_KEY",
                    "DB_PARTITION_COUNT",
                    "TB_PARTITION_COUNT",
                ],
                vec![vec![
                    Some(self.name.as_str()),
                    Some(column.as_str()),
                    Some(db_partitions.as_str()),
                    Some(tb_partitions.as_str()),
                ]],
            );
        }
    }
}
