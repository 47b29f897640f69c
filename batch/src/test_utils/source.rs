use std::sync::Arc;
use std::time::Duration;

use futures::stream;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use crate::batch_error;
use crate::error::{BatchResult, ErrorKind};
use crate::source::{Connection, DataSource, RowStream, SqlRow};
use crate::test_utils::notify::TimedNotify;

/// Rows served for queries containing `pattern`.
#[derive(Debug, Clone)]
struct CannedRows {
    pattern: String,
    columns: Arc<[String]>,
    rows: Vec<Vec<Option<String>>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    executed: Vec<String>,
    queries: Vec<String>,
    rows: Vec<CannedRows>,
    counts: Vec<(String, u64)>,
    failures: Vec<(String, ErrorKind)>,
    connection_failure: Option<ErrorKind>,
    execute_delay: Option<Duration>,
    connections_opened: usize,
    connections_closed: usize,
}

impl MemoryState {
    fn failure_for(&self, sql: &str) -> Option<ErrorKind> {
        self.failures
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, kind)| *kind)
    }
}

/// In-memory [`DataSource`] for tests.
///
/// Statements passed to `execute` are recorded in order. Queries are answered with the first
/// canned result whose pattern is contained in the SQL text, or with no rows. Failures are
/// injected the same way, by pattern.
#[derive(Debug, Clone)]
pub struct MemoryDataSource {
    state: Arc<Mutex<MemoryState>>,
    executed_notify: Arc<Notify>,
    schema: Arc<str>,
}

impl MemoryDataSource {
    pub fn new(schema: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            executed_notify: Arc::new(Notify::new()),
            schema: schema.into(),
        }
    }

    /// Serves `rows` for queries containing `pattern`.
    pub fn on_query(&self, pattern: &str, columns: &[&str], rows: Vec<Vec<Option<&str>>>) {
        let columns: Arc<[String]> = columns.iter().map(|column| column.to_string()).collect();
        let rows = rows
            .into_iter()
            .map(|row| row.into_iter().map(|value| value.map(str::to_string)).collect())
            .collect();

        self.state.lock().rows.push(CannedRows {
            pattern: pattern.to_string(),
            columns,
            rows,
        });
    }

    /// Answers count queries containing `pattern` with `count`.
    pub fn on_count(&self, pattern: &str, count: u64) {
        self.state.lock().counts.push((pattern.to_string(), count));
    }

    /// Fails statements and queries containing `pattern` with `kind`.
    pub fn fail_when(&self, pattern: &str, kind: ErrorKind) {
        self.state.lock().failures.push((pattern.to_string(), kind));
    }

    /// Fails every new connection with `kind`.
    pub fn fail_connections(&self, kind: ErrorKind) {
        self.state.lock().connection_failure = Some(kind);
    }

    /// Delays every executed statement.
    pub fn delay_execute(&self, delay: Duration) {
        self.state.lock().execute_delay = Some(delay);
    }

    /// Statements executed so far, in execution order.
    pub fn executed(&self) -> Vec<String> {
        self.state.lock().executed.clone()
    }

    /// Queries run so far, in order.
    pub fn queries(&self) -> Vec<String> {
        self.state.lock().queries.clone()
    }

    pub fn connections_opened(&self) -> usize {
        self.state.lock().connections_opened
    }

    pub fn connections_closed(&self) -> usize {
        self.state.lock().connections_closed
    }

    /// Notified after every executed statement.
    pub fn executed_notify(&self) -> TimedNotify {
        TimedNotify::new(self.executed_notify.clone())
    }
}

impl DataSource for MemoryDataSource {
    type Connection = MemoryConnection;

    async fn connection(&self) -> BatchResult<MemoryConnection> {
        let mut state = self.state.lock();
        if let Some(kind) = state.connection_failure {
            return Err(batch_error!(kind, "Injected connection failure"));
        }
        state.connections_opened += 1;

        Ok(MemoryConnection {
            state: self.state.clone(),
            executed_notify: self.executed_notify.clone(),
        })
    }

    fn schema_name(&self) -> &str {
        &self.schema
    }
}

/// Connection handed out by [`MemoryDataSource`].
#[derive(Debug)]
pub struct MemoryConnection {
    state: Arc<Mutex<MemoryState>>,
    executed_notify: Arc<Notify>,
}

impl Connection for MemoryConnection {
    async fn execute(&mut self, sql: &str) -> BatchResult<u64> {
        let delay = self.state.lock().execute_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        {
            let mut state = self.state.lock();
            if let Some(kind) = state.failure_for(sql) {
                return Err(batch_error!(kind, "Injected statement failure", sql));
            }
            state.executed.push(sql.to_string());
        }
        debug!(sql, "executed statement");
        self.executed_notify.notify_waiters();

        Ok(1)
    }

    fn fetch_rows<'a>(&'a mut self, sql: &'a str) -> RowStream<'a> {
        let mut state = self.state.lock();
        state.queries.push(sql.to_string());

        if let Some(kind) = state.failure_for(sql) {
            let err = batch_error!(kind, "Injected query failure", sql);
            return Box::pin(stream::iter(vec![Err(err)]));
        }

        let rows: Vec<BatchResult<SqlRow>> = state
            .rows
            .iter()
            .find(|canned| sql.contains(canned.pattern.as_str()))
            .map(|canned| {
                canned
                    .rows
                    .iter()
                    .map(|values| Ok(SqlRow::new(canned.columns.clone(), values.clone())))
                    .collect()
            })
            .unwrap_or_default();

        Box::pin(stream::iter(rows))
    }

    async fn fetch_count(&mut self, sql: &str) -> BatchResult<u64> {
        let mut state = self.state.lock();
        state.queries.push(sql.to_string());

        if let Some(kind) = state.failure_for(sql) {
            return Err(batch_error!(kind, "Injected count failure", sql));
        }

        state
            .counts
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, count)| *count)
            .ok_or_else(|| batch_error!(ErrorKind::QueryFailed, "No count registered", sql))
    }

    async fn close(self) -> BatchResult<()> {
        self.state.lock().connections_closed += 1;
        Ok(())
    }
}
