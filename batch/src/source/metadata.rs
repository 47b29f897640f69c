//! Table metadata lookups.
//!
//! Column and key information comes from `information_schema`; shard layout and partition rules
//! come from the sharding proxy's `SHOW TOPOLOGY` and `SHOW RULE` statements.

use futures::TryStreamExt;
use tracing::debug;

use crate::bail;
use crate::error::{BatchResult, ErrorKind};
use crate::source::{Connection, SqlRow};
use crate::sql::{escape_sql, quote_identifier};
use crate::types::{FieldMetaInfo, FieldType, PartitionKey, PrimaryKey, TableTopology};

/// Everything consumers and export workers need to know about one logical table.
#[derive(Debug, Clone, Default)]
pub struct TableMetadata {
    pub primary_keys: Vec<PrimaryKey>,
    pub fields: Vec<FieldMetaInfo>,
    pub topology: Vec<TableTopology>,
    pub partition_key: Option<PartitionKey>,
}

fn columns_sql(schema: &str, table: &str, primary_only: bool) -> String {
    let mut sql = format!(
        "SELECT COLUMN_NAME,DATA_TYPE,ORDINAL_POSITION FROM INFORMATION_SCHEMA.COLUMNS \
         WHERE TABLE_SCHEMA='{}' AND TABLE_NAME='{}'",
        escape_sql(schema),
        escape_sql(table)
    );
    if primary_only {
        sql.push_str(" AND COLUMN_KEY='PRI'");
    }
    sql.push_str(" ORDER BY ORDINAL_POSITION;");
    sql
}

async fn fetch_all<C: Connection>(conn: &mut C, sql: &str) -> BatchResult<Vec<SqlRow>> {
    conn.fetch_rows(sql).try_collect().await
}

/// Parses a `COLUMN_NAME, DATA_TYPE, ORDINAL_POSITION` row.
fn column_row(row: &SqlRow) -> BatchResult<(String, FieldType, usize)> {
    let (Some(name), Some(data_type), Some(position)) = (row.get(0), row.get(1), row.get(2)) else {
        bail!(
            ErrorKind::InvalidData,
            "Column metadata row is incomplete",
            format!("{:?}", row.values())
        );
    };

    Ok((
        name.to_string(),
        FieldType::from_sql_type(data_type),
        position.trim().parse()?,
    ))
}

/// Primary key columns of `table`, in column order.
pub async fn load_primary_keys<C: Connection>(
    conn: &mut C,
    schema: &str,
    table: &str,
) -> BatchResult<Vec<PrimaryKey>> {
    let rows = fetch_all(conn, &columns_sql(schema, table, true)).await?;

    rows.iter()
        .map(|row| {
            let (name, field_type, position) = column_row(row)?;
            Ok(PrimaryKey::new(name, field_type, position))
        })
        .collect()
}

/// All columns of `table`, in column order.
pub async fn load_fields<C: Connection>(
    conn: &mut C,
    schema: &str,
    table: &str,
) -> BatchResult<Vec<FieldMetaInfo>> {
    let rows = fetch_all(conn, &columns_sql(schema, table, false)).await?;

    let fields = rows
        .iter()
        .map(|row| {
            let (name, field_type, position) = column_row(row)?;
            Ok(FieldMetaInfo::new(name, field_type, position.saturating_sub(1)))
        })
        .collect::<BatchResult<Vec<_>>>()?;

    if fields.is_empty() {
        bail!(
            ErrorKind::MissingTableMetadata,
            "Table does not exist or has no columns",
            format!("table `{schema}`.`{table}`")
        );
    }

    Ok(fields)
}

/// Physical shards of `table`.
pub async fn load_topology<C: Connection>(
    conn: &mut C,
    table: &str,
) -> BatchResult<Vec<TableTopology>> {
    let sql = format!("SHOW TOPOLOGY FROM {};", quote_identifier(table));
    let rows = fetch_all(conn, &sql).await?;

    rows.iter()
        .map(|row| match (row.get_by_name("GROUP_NAME"), row.get_by_name("TABLE_NAME")) {
            (Some(group), Some(physical)) => Ok(TableTopology::new(group, physical)),
            _ => bail!(
                ErrorKind::InvalidData,
                "Topology row lacks GROUP_NAME or TABLE_NAME",
                format!("table `{table}`")
            ),
        })
        .collect()
}

/// Sharding rule of `table`, resolved against its columns.
///
/// Returns `None` for tables without a database partition key.
pub async fn load_partition_key<C: Connection>(
    conn: &mut C,
    table: &str,
    fields: &[FieldMetaInfo],
) -> BatchResult<Option<PartitionKey>> {
    let sql = format!("SHOW RULE FROM {};", quote_identifier(table));
    let rows = fetch_all(conn, &sql).await?;

    let Some(rule) = rows.first() else {
        return Ok(None);
    };
    let Some(key_name) = rule
        .get_by_name("DB_PARTITION_KEY")
        .map(str::trim)
        .filter(|key| !key.is_empty())
    else {
        return Ok(None);
    };

    let Some(field) = fields
        .iter()
        .find(|field| field.name.eq_ignore_ascii_case(key_name))
    else {
        bail!(
            ErrorKind::MissingTableMetadata,
            "Partition key column not found",
            format!("table `{table}` has no column `{key_name}`")
        );
    };

    let count = |name: &str| -> BatchResult<usize> {
        Ok(rule
            .get_by_name(name)
            .map(|value| value.trim().parse::<usize>())
            .transpose()?
            .unwrap_or(1))
    };

    Ok(Some(PartitionKey {
        field: field.clone(),
        db_partition_count: count("DB_PARTITION_COUNT")?,
        tb_partition_count: count("TB_PARTITION_COUNT")?,
    }))
}

/// Loads the metadata of `table`. Shard layout is only looked up when `sharded` is set.
pub async fn load_table_metadata<C: Connection>(
    conn: &mut C,
    schema: &str,
    table: &str,
    sharded: bool,
) -> BatchResult<TableMetadata> {
    let fields = load_fields(conn, schema, table).await?;
    let primary_keys = load_primary_keys(conn, schema, table).await?;

    let (topology, partition_key) = if sharded {
        let topology = load_topology(conn, table).await?;
        let partition_key = load_partition_key(conn, table, &fields).await?;
        (topology, partition_key)
    } else {
        (Vec::new(), None)
    };

    debug!(
        table,
        columns = fields.len(),
        primary_keys = primary_keys.len(),
        shards = topology.len(),
        "loaded table metadata"
    );

    Ok(TableMetadata {
        primary_keys,
        fields,
        topology,
        partition_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_queries_escape_names() {
        let sql = columns_sql("shop", "o'rders", true);

        assert_eq!(
            sql,
            "SELECT COLUMN_NAME,DATA_TYPE,ORDINAL_POSITION FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_SCHEMA='shop' AND TABLE_NAME='o\\'rders' AND COLUMN_KEY='PRI' \
             ORDER BY ORDINAL_POSITION;"
        );
    }
}
