use std::sync::Arc;

use batch_config::shared::{IntoConnectOptions, MySqlConnectionConfig};
use futures::{StreamExt, TryStreamExt};
use sqlx::mysql::{MySqlPoolOptions, MySqlRow};
use sqlx::pool::PoolConnection;
use sqlx::{Column, Either, MySql, MySqlPool, Row};
use tracing::{debug, info};

use crate::bail;
use crate::error::{BatchResult, ErrorKind};
use crate::source::{Connection, DataSource, RowStream, SqlRow};

/// [`DataSource`] backed by a sqlx MySQL pool.
#[derive(Debug, Clone)]
pub struct MySqlDataSource {
    pool: MySqlPool,
    schema: Arc<str>,
}

impl MySqlDataSource {
    /// Opens a pool sized by `config` and checks that the server is reachable.
    pub async fn connect(config: &MySqlConnectionConfig) -> BatchResult<Self> {
        let pool = MySqlPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect_with(config.with_db())
            .await?;

        info!(
            host = %config.host,
            port = config.port,
            schema = %config.name,
            max_connections = config.max_connections,
            "connected to target database"
        );

        Ok(Self::from_pool(pool, &config.name))
    }

    pub fn from_pool(pool: MySqlPool, schema: &str) -> Self {
        Self {
            pool,
            schema: Arc::from(schema),
        }
    }

    /// Closes every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
        debug!("target database pool closed");
    }
}

impl DataSource for MySqlDataSource {
    type Connection = MySqlPooledConnection;

    async fn connection(&self) -> BatchResult<Self::Connection> {
        let conn = self.pool.acquire().await?;

        Ok(MySqlPooledConnection { conn })
    }

    fn schema_name(&self) -> &str {
        &self.schema
    }
}

/// Connection checked out of a [`MySqlDataSource`].
///
/// Statements go through the text protocol, so every value decodes as text regardless of its
/// column type.
#[derive(Debug)]
pub struct MySqlPooledConnection {
    conn: PoolConnection<MySql>,
}

impl Connection for MySqlPooledConnection {
    async fn execute(&mut self, sql: &str) -> BatchResult<u64> {
        let mut affected = 0;
        let mut results = sqlx::raw_sql(sql).fetch_many(&mut *self.conn);
        while let Some(step) = results.try_next().await? {
            if let Either::Left(result) = step {
                affected += result.rows_affected();
            }
        }

        Ok(affected)
    }

    fn fetch_rows<'a>(&'a mut self, sql: &'a str) -> RowStream<'a> {
        let mut columns: Option<Arc<[String]>> = None;

        sqlx::raw_sql(sql)
            .fetch(&mut *self.conn)
            .map(move |row| {
                let row = row?;
                let columns = columns
                    .get_or_insert_with(|| {
                        row.columns()
                            .iter()
                            .map(|column| column.name().to_string())
                            .collect()
                    })
                    .clone();

                Ok(SqlRow::new(columns, decode_values(&row)?))
            })
            .boxed()
    }

    async fn fetch_count(&mut self, sql: &str) -> BatchResult<u64> {
        let row = sqlx::raw_sql(sql)
            .fetch(&mut *self.conn)
            .next()
            .await
            .transpose()?;

        let Some(row) = row else {
            bail!(
                ErrorKind::RowCountUnavailable,
                "Count query returned no rows",
                sql.to_string()
            );
        };

        let count = row.try_get_unchecked::<Option<String>, _>(0)?;
        match count {
            Some(count) => Ok(count.trim().parse()?),
            None => bail!(
                ErrorKind::RowCountUnavailable,
                "Count query returned NULL",
                sql.to_string()
            ),
        }
    }

    async fn close(self) -> BatchResult<()> {
        // Dropping a pool connection hands it back to the pool.
        drop(self.conn);

        Ok(())
    }
}

fn decode_values(row: &MySqlRow) -> BatchResult<Vec<Option<String>>> {
    let mut values = Vec::with_capacity(row.len());
    for index in 0..row.len() {
        values.push(row.try_get_unchecked::<Option<String>, _>(index)?);
    }

    Ok(values)
}
