use std::fmt;

use crate::bail;
use crate::error::{BatchResult, ErrorKind};

/// Coarse classification of a column's SQL type.
///
/// It decides how values are quoted in rendered statements and how partition keys are hashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    String,
    Int,
    Float,
    Date,
    Other,
}

impl FieldType {
    /// Maps an `information_schema.COLUMNS.DATA_TYPE` value onto a [`FieldType`].
    pub fn from_sql_type(data_type: &str) -> Self {
        match data_type.trim().to_ascii_lowercase().as_str() {
            "varchar" | "char" | "text" => FieldType::String,
            "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" => FieldType::Int,
            "decimal" | "float" | "double" => FieldType::Float,
            "date" => FieldType::Date,
            _ => FieldType::Other,
        }
    }

    /// Returns whether values of this type must be enclosed in single quotes in SQL.
    pub fn needs_quote(&self) -> bool {
        !matches!(self, FieldType::Int | FieldType::Float)
    }
}

/// Metadata of one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMetaInfo {
    pub name: String,
    pub field_type: FieldType,
    /// 0-based position of the column in the table, and of the value in a row.
    pub index: usize,
}

impl FieldMetaInfo {
    pub fn new(name: impl Into<String>, field_type: FieldType, index: usize) -> Self {
        Self {
            name: name.into(),
            field_type,
            index,
        }
    }
}

/// One primary key column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryKey {
    pub name: String,
    pub field_type: FieldType,
    /// 1-based ordinal position of the column, as reported by `information_schema`.
    pub ordinal_position: usize,
}

impl PrimaryKey {
    pub fn new(name: impl Into<String>, field_type: FieldType, ordinal_position: usize) -> Self {
        Self {
            name: name.into(),
            field_type,
            ordinal_position,
        }
    }

    /// Index of this key's value within a row.
    pub fn value_index(&self) -> usize {
        self.ordinal_position.saturating_sub(1)
    }
}

/// One physical shard of a logical table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableTopology {
    /// Group (database shard) name, used in routing hints.
    pub group_name: String,
    /// Physical table name inside the group.
    pub table_name: String,
}

impl TableTopology {
    pub fn new(group_name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            group_name: group_name.into(),
            table_name: table_name.into(),
        }
    }
}

impl fmt::Display for TableTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group_name, self.table_name)
    }
}

/// Sharding rule of a logical table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionKey {
    pub field: FieldMetaInfo,
    pub db_partition_count: usize,
    pub tb_partition_count: usize,
}

impl PartitionKey {
    /// Total number of physical shards, which equals the topology length.
    pub fn partition_size(&self) -> usize {
        self.db_partition_count.max(1) * self.tb_partition_count.max(1)
    }

    /// Returns the topology index a row with partition value `value` belongs to.
    ///
    /// String keys use the JVM string hash, integer keys their absolute value, both modulo
    /// [`PartitionKey::partition_size`]. Other key types cannot be routed.
    pub fn partition_index(&self, value: &str) -> BatchResult<usize> {
        let size = self.partition_size() as u64;

        match self.field.field_type {
            FieldType::String => Ok((u64::from(jvm_string_hash(value).unsigned_abs()) % size) as usize),
            FieldType::Int => {
                let parsed: i64 = value.trim().parse()?;
                Ok((parsed.unsigned_abs() % size) as usize)
            }
            other => bail!(
                ErrorKind::UnsupportedOperation,
                "Partition key type cannot be routed",
                format!("column `{}` has type {other:?}", self.field.name)
            ),
        }
    }
}

/// `s[0]*31^(n-1) + s[1]*31^(n-2) + ... + s[n-1]` over UTF-16 code units with wrapping `i32`
/// arithmetic, matching the hash the sharding rules were computed with.
pub fn jvm_string_hash(value: &str) -> i32 {
    value
        .encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(i32::from(unit)))
}
