//! Row accumulation strategies of consumers.
//!
//! A [`RowStrategy`] is bound once per consumer from the [`ConsumerContext`]. It receives rows one
//! at a time, buffers them locally and hands out a [`Flush`] whenever a buffer reaches the row or
//! byte threshold. Buffers preserve arrival order; sharded strategies keep one buffer per shard so
//! a flush never mixes rows of different shards.

use tracing::debug;

use crate::bail;
use crate::context::ConsumerContext;
use crate::error::{BatchResult, ErrorKind};
use crate::file::RowFormatter;
use crate::sql::{
    append_insert_values, append_pk_values, render_delete_in, render_insert, render_single_delete,
};
use crate::types::{FieldMetaInfo, PartitionKey, PrimaryKey, RowEvent};

/// Which statements (or file lines) a consumer produces.
#[derive(Debug, Clone)]
pub enum StrategyKind {
    /// One `DELETE ... WHERE pk=v` per row.
    SingleDelete,
    /// Batched `DELETE ... WHERE (pk) IN (...)`.
    DeleteIn,
    /// Batched `DELETE ... IN (...)` per shard, prefixed with the shard's routing hint.
    ShardedDeleteIn,
    /// Batched multi-row `INSERT`.
    Insert,
    /// Batched multi-row `INSERT` per shard, prefixed with the shard's routing hint.
    ShardedInsert,
    /// Formatted data file lines.
    ExportRows(RowFormatter),
}

impl StrategyKind {
    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::SingleDelete => "single_delete",
            StrategyKind::DeleteIn => "delete_in",
            StrategyKind::ShardedDeleteIn => "sharded_delete_in",
            StrategyKind::Insert => "insert",
            StrategyKind::ShardedInsert => "sharded_insert",
            StrategyKind::ExportRows(_) => "export_rows",
        }
    }
}

/// Buffer limits after which a batch is flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushThresholds {
    pub max_rows: usize,
    pub max_bytes: usize,
}

impl FlushThresholds {
    pub fn new(max_rows: usize, max_bytes: usize) -> Self {
        Self {
            max_rows: max_rows.max(1),
            max_bytes: max_bytes.max(1),
        }
    }

    fn reached(&self, rows: usize, bytes: usize) -> bool {
        rows >= self.max_rows || bytes >= self.max_bytes
    }
}

/// A unit of work handed from a strategy to its sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flush {
    /// A rendered statement covering `rows` rows, routed to `group` when sharded.
    Sql {
        statement: String,
        rows: u64,
        group: Option<String>,
    },
    /// Formatted file lines.
    Bytes { bytes: Vec<u8>, rows: u64 },
}

impl Flush {
    pub fn rows(&self) -> u64 {
        match self {
            Flush::Sql { rows, .. } | Flush::Bytes { rows, .. } => *rows,
        }
    }
}

/// How an accumulated batch becomes a statement.
#[derive(Debug, Clone)]
enum Template {
    DeleteIn {
        keys: Vec<PrimaryKey>,
        where_condition: Option<String>,
    },
    Insert {
        fields: Vec<FieldMetaInfo>,
        columns: Vec<String>,
        ignore: bool,
        sql_escape: bool,
    },
}

/// Accumulates value tuples for one target table.
#[derive(Debug)]
struct Batch {
    table: String,
    hint: Option<String>,
    group: Option<String>,
    values: String,
    rows: usize,
}

impl Batch {
    fn new(table: impl Into<String>, hint: Option<String>, group: Option<String>) -> Self {
        Self {
            table: table.into(),
            hint,
            group,
            values: String::new(),
            rows: 0,
        }
    }

    /// Appends one row's tuple. A failed row leaves the buffer as it was.
    fn append(&mut self, template: &Template, row: &[String]) -> BatchResult<()> {
        let checkpoint = self.values.len();
        if self.rows > 0 {
            self.values.push(',');
        }

        let appended = match template {
            Template::DeleteIn { keys, .. } => {
                self.values.push('(');
                append_pk_values(&mut self.values, keys, row).map(|_| self.values.push(')'))
            }
            Template::Insert {
                fields, sql_escape, ..
            } => append_insert_values(&mut self.values, fields, row, *sql_escape),
        };

        if let Err(err) = appended {
            self.values.truncate(checkpoint);
            return Err(err);
        }

        self.rows += 1;
        Ok(())
    }

    fn take(&mut self, template: &Template) -> Option<Flush> {
        if self.rows == 0 {
            return None;
        }

        let values = std::mem::take(&mut self.values);
        let rows = std::mem::take(&mut self.rows) as u64;
        let hint = self.hint.as_deref();

        let statement = match template {
            Template::DeleteIn {
                keys,
                where_condition,
            } => render_delete_in(hint, &self.table, keys, &values, where_condition.as_deref()),
            Template::Insert {
                columns, ignore, ..
            } => render_insert(hint, &self.table, columns, &values, *ignore),
        };

        Some(Flush::Sql {
            statement,
            rows,
            group: self.group.clone(),
        })
    }
}

#[derive(Debug)]
enum Mode {
    SingleDelete {
        table: String,
        keys: Vec<PrimaryKey>,
        where_condition: Option<String>,
    },
    Batched {
        template: Template,
        batch: Batch,
    },
    Sharded {
        template: Template,
        partition_key: PartitionKey,
        shards: Vec<Batch>,
    },
    ExportRows {
        formatter: RowFormatter,
        bytes: Vec<u8>,
        rows: usize,
    },
}

/// A consumer's bound strategy together with its local buffers.
#[derive(Debug)]
pub struct RowStrategy {
    name: &'static str,
    mode: Mode,
    thresholds: FlushThresholds,
}

impl RowStrategy {
    /// Binds `kind` to the metadata of `table`.
    ///
    /// Fails when the table lacks what the strategy needs: a primary key for deletes, column
    /// metadata for inserts, a partition key and topology for sharded strategies.
    pub fn bind(
        kind: StrategyKind,
        context: &ConsumerContext,
        table: &str,
        thresholds: FlushThresholds,
    ) -> BatchResult<Self> {
        let name = kind.name();
        let where_condition = context.where_condition().map(str::to_string);

        let mode = match kind {
            StrategyKind::SingleDelete => Mode::SingleDelete {
                table: table.to_string(),
                keys: context.primary_keys(table)?.to_vec(),
                where_condition,
            },
            StrategyKind::DeleteIn => Mode::Batched {
                template: Template::DeleteIn {
                    keys: context.primary_keys(table)?.to_vec(),
                    where_condition,
                },
                batch: Batch::new(table, None, None),
            },
            StrategyKind::Insert => Mode::Batched {
                template: insert_template(context, table)?,
                batch: Batch::new(table, None, None),
            },
            StrategyKind::ShardedDeleteIn => {
                let template = Template::DeleteIn {
                    keys: context.primary_keys(table)?.to_vec(),
                    where_condition,
                };
                sharded_mode(context, table, template)?
            }
            StrategyKind::ShardedInsert => {
                let template = insert_template(context, table)?;
                sharded_mode(context, table, template)?
            }
            StrategyKind::ExportRows(formatter) => Mode::ExportRows {
                formatter,
                bytes: Vec::new(),
                rows: 0,
            },
        };

        debug!(table, strategy = name, "bound row strategy");

        Ok(Self {
            name,
            mode,
            thresholds,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Adds `row` to the local buffer and returns a flush if a threshold was reached.
    pub fn append(&mut self, row: &RowEvent) -> BatchResult<Option<Flush>> {
        let thresholds = self.thresholds;

        match &mut self.mode {
            Mode::SingleDelete {
                table,
                keys,
                where_condition,
            } => {
                let statement =
                    render_single_delete(None, table, keys, &row.fields, where_condition.as_deref())?;
                Ok(Some(Flush::Sql {
                    statement,
                    rows: 1,
                    group: None,
                }))
            }
            Mode::Batched { template, batch } => {
                batch.append(template, &row.fields)?;
                if thresholds.reached(batch.rows, batch.values.len()) {
                    return Ok(batch.take(template));
                }
                Ok(None)
            }
            Mode::Sharded {
                template,
                partition_key,
                shards,
            } => {
                let Some(value) = row.fields.get(partition_key.field.index) else {
                    bail!(
                        ErrorKind::InvalidData,
                        "Row has no value for the partition key",
                        format!(
                            "partition key `{}` is column {} but the row has {} fields",
                            partition_key.field.name,
                            partition_key.field.index,
                            row.fields.len()
                        )
                    );
                };

                let index = partition_key.partition_index(value)?;
                let Some(shard) = shards.get_mut(index) else {
                    bail!(
                        ErrorKind::InvalidState,
                        "Partition index is outside the table topology",
                        format!("index {index} with {} shards", shards.len())
                    );
                };

                shard.append(template, &row.fields)?;
                if thresholds.reached(shard.rows, shard.values.len()) {
                    return Ok(shard.take(template));
                }
                Ok(None)
            }
            Mode::ExportRows {
                formatter,
                bytes,
                rows,
            } => {
                formatter.format_fields(&row.fields, bytes)?;
                *rows += 1;
                if thresholds.reached(*rows, bytes.len()) {
                    let rows = std::mem::take(rows) as u64;
                    return Ok(Some(Flush::Bytes {
                        bytes: std::mem::take(bytes),
                        rows,
                    }));
                }
                Ok(None)
            }
        }
    }

    /// Flushes every non-empty buffer, in shard order.
    pub fn drain(&mut self) -> Vec<Flush> {
        match &mut self.mode {
            Mode::SingleDelete { .. } => Vec::new(),
            Mode::Batched { template, batch } => batch.take(template).into_iter().collect(),
            Mode::Sharded {
                template, shards, ..
            } => shards
                .iter_mut()
                .filter_map(|shard| shard.take(template))
                .collect(),
            Mode::ExportRows { bytes, rows, .. } => {
                if *rows == 0 {
                    return Vec::new();
                }
                let rows = std::mem::take(rows) as u64;
                vec![Flush::Bytes {
                    bytes: std::mem::take(bytes),
                    rows,
                }]
            }
        }
    }

    /// Rows currently held in local buffers.
    pub fn buffered_rows(&self) -> usize {
        match &self.mode {
            Mode::SingleDelete { .. } => 0,
            Mode::Batched { batch, .. } => batch.rows,
            Mode::Sharded { shards, .. } => shards.iter().map(|shard| shard.rows).sum(),
            Mode::ExportRows { rows, .. } => *rows,
        }
    }
}

/// Insert template for `table`, restricted to the configured column list if there is one.
fn insert_template(context: &ConsumerContext, table: &str) -> BatchResult<Template> {
    let options = context.options();
    let table_fields = context.fields(table)?;

    let fields = if options.insert_columns.is_empty() {
        table_fields.to_vec()
    } else {
        options
            .insert_columns
            .iter()
            .map(|column| {
                match table_fields
                    .iter()
                    .find(|field| field.name.eq_ignore_ascii_case(column))
                {
                    Some(field) => Ok(field.clone()),
                    None => bail!(
                        ErrorKind::MissingTableMetadata,
                        "Insert column does not exist",
                        format!("table `{table}` has no column `{column}`")
                    ),
                }
            })
            .collect::<BatchResult<Vec<_>>>()?
    };

    Ok(Template::Insert {
        fields,
        columns: options.insert_columns.clone(),
        ignore: options.insert_ignore,
        sql_escape: options.sql_escape,
    })
}

fn sharded_mode(context: &ConsumerContext, table: &str, template: Template) -> BatchResult<Mode> {
    let partition_key = context.partition_key(table)?.clone();
    let topology = context.topology(table);
    if topology.is_empty() {
        bail!(
            ErrorKind::MissingTableMetadata,
            "Sharded table has no topology",
            format!("table `{table}`")
        );
    }

    let shards = topology
        .iter()
        .map(|shard| {
            Batch::new(
                shard.table_name.clone(),
                Some(context.routing_hint(&shard.group_name)),
                Some(shard.group_name.clone()),
            )
        })
        .collect();

    Ok(Mode::Sharded {
        template,
        partition_key,
        shards,
    })
}
