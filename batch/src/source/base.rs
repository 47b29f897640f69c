use std::future::Future;
use std::sync::Arc;

use futures::stream::BoxStream;

use crate::error::BatchResult;

/// Stream of result rows produced by [`Connection::fetch_rows`].
pub type RowStream<'a> = BoxStream<'a, BatchResult<SqlRow>>;

/// One result row with every value rendered as text.
///
/// Column names are shared by all rows of the same result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlRow {
    columns: Arc<[String]>,
    values: Vec<Option<String>>,
}

impl SqlRow {
    pub fn new(columns: Arc<[String]>, values: Vec<Option<String>>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Option<String>] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Option<String>> {
        self.values
    }

    /// Value at `index`, `None` for `NULL` or a missing column.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.values.get(index).and_then(Option::as_deref)
    }

    /// Value of the column called `name`, compared case-insensitively.
    pub fn get_by_name(&self, name: &str) -> Option<&str> {
        let index = self
            .columns
            .iter()
            .position(|column| column.eq_ignore_ascii_case(name))?;
        self.get(index)
    }
}

/// Hands out connections to the target database.
///
/// Implementations are cheap to clone and shared by every worker of a run.
pub trait DataSource: Clone + Send + Sync + 'static {
    type Connection: Connection;

    /// Acquires a connection for exclusive use by one worker.
    fn connection(&self) -> impl Future<Output = BatchResult<Self::Connection>> + Send;

    /// Name of the schema statements run against.
    fn schema_name(&self) -> &str;
}

/// A connection owned by one worker.
pub trait Connection: Send + 'static {
    /// Executes a statement and returns the number of affected rows.
    fn execute(&mut self, sql: &str) -> impl Future<Output = BatchResult<u64>> + Send;

    /// Streams the rows of a query.
    fn fetch_rows<'a>(&'a mut self, sql: &'a str) -> RowStream<'a>;

    /// Runs a `COUNT(*)`-style query and returns the first column of its only row.
    fn fetch_count(&mut self, sql: &str) -> impl Future<Output = BatchResult<u64>> + Send;

    /// Returns the connection.
    ///
    /// Failures here are resource-release errors: callers log them and carry on.
    fn close(self) -> impl Future<Output = BatchResult<()>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_are_looked_up_case_insensitively() {
        let columns: Arc<[String]> = vec!["GROUP_NAME".to_string(), "TABLE_NAME".to_string()].into();
        let row = SqlRow::new(columns, vec![Some("g0".to_string()), None]);

        assert_eq!(row.get_by_name("group_name"), Some("g0"));
        assert_eq!(row.get_by_name("TABLE_NAME"), None);
        assert_eq!(row.get_by_name("missing"), None);
        assert_eq!(row.get(0), Some("g0"));
    }
}
