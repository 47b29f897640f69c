//! Run statistics: statement timings, per-file row counts and live progress.
//!
//! Everything here is shared between workers and mutated concurrently. [`SqlStat`] takes a short
//! lock per statement; counters are atomics.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::concurrency::latch::CountDownLatch;
use crate::concurrency::pipeline::PipelineProbe;

#[derive(Debug, Default, Clone, Copy)]
struct SqlTiming {
    total: Duration,
    count: u64,
}

/// Running timing aggregate of one statement class.
#[derive(Debug)]
pub struct SqlStat {
    name: String,
    timing: Mutex<SqlTiming>,
}

impl SqlStat {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timing: Mutex::new(SqlTiming::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Records one statement that took `elapsed`.
    pub fn add_time(&self, elapsed: Duration) {
        let mut timing = self.timing.lock();
        timing.total += elapsed;
        timing.count += 1;
    }

    pub fn count(&self) -> u64 {
        self.timing.lock().count
    }

    pub fn total(&self) -> Duration {
        self.timing.lock().total
    }

    /// Average statement time in milliseconds, `0` when nothing was recorded.
    ///
    /// The total is truncated to whole milliseconds before dividing.
    pub fn average(&self) -> f64 {
        let timing = *self.timing.lock();
        if timing.count == 0 {
            return 0.0;
        }

        timing.total.as_millis() as f64 / timing.count as f64
    }
}

/// Rows written to (or read from) one data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReaderStat {
    path: String,
    rows: u64,
}

impl FileReaderStat {
    pub fn new(path: impl Into<String>, rows: u64) -> Self {
        Self {
            path: path.into(),
            rows,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }
}

/// Statistics root of one run.
#[derive(Debug, Default)]
pub struct DebugInfo {
    sql_stats: Mutex<Vec<Arc<SqlStat>>>,
    file_stats: Mutex<Vec<FileReaderStat>>,
    pipeline: Mutex<Option<PipelineProbe>>,
    latch: Mutex<Option<Arc<CountDownLatch>>>,
    remaining_rows: AtomicU64,
    processed_rows: AtomicU64,
}

impl DebugInfo {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the statement stat called `name`, creating it on first use.
    pub fn sql_stat(&self, name: &str) -> Arc<SqlStat> {
        let mut stats = self.sql_stats.lock();
        if let Some(stat) = stats.iter().find(|stat| stat.name() == name) {
            return stat.clone();
        }

        let stat = Arc::new(SqlStat::new(name));
        stats.push(stat.clone());
        stat
    }

    pub fn sql_stats(&self) -> Vec<Arc<SqlStat>> {
        self.sql_stats.lock().clone()
    }

    pub fn add_file_stat(&self, stat: FileReaderStat) {
        self.file_stats.lock().push(stat);
    }

    pub fn file_stats(&self) -> Vec<FileReaderStat> {
        self.file_stats.lock().clone()
    }

    pub fn set_pipeline(&self, probe: PipelineProbe) {
        *self.pipeline.lock() = Some(probe);
    }

    pub fn pipeline(&self) -> Option<PipelineProbe> {
        self.pipeline.lock().clone()
    }

    pub fn set_latch(&self, latch: Arc<CountDownLatch>) {
        *self.latch.lock() = Some(latch);
    }

    /// Workers that have not finished yet, if a worker pool is attached.
    pub fn running_workers(&self) -> Option<usize> {
        self.latch.lock().as_ref().map(|latch| latch.count())
    }

    /// Marks a row as read and not yet processed.
    pub fn row_published(&self) {
        self.remaining_rows.fetch_add(1, Ordering::AcqRel);
    }

    /// Marks `rows` rows as processed.
    ///
    /// Rows that never went through the pipeline (direct export) only bump the processed count.
    pub fn rows_processed(&self, rows: u64, from_pipeline: bool) {
        self.processed_rows.fetch_add(rows, Ordering::AcqRel);
        if from_pipeline {
            let _ = self
                .remaining_rows
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |remaining| {
                    Some(remaining.saturating_sub(rows))
                });
        }
    }

    pub fn remaining_rows(&self) -> u64 {
        self.remaining_rows.load(Ordering::Acquire)
    }

    pub fn processed_rows(&self) -> u64 {
        self.processed_rows.load(Ordering::Acquire)
    }
}

impl fmt::Display for DebugInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed rows: {}, remaining rows: {}",
            self.processed_rows(),
            self.remaining_rows()
        )?;

        if let Some(probe) = self.pipeline() {
            write!(
                f,
                "\npipeline: capacity {}, published {}, claimed {}",
                probe.capacity(),
                probe.published(),
                probe.claimed()
            )?;
        }

        if let Some(running) = self.running_workers() {
            write!(f, "\nrunning workers: {running}")?;
        }

        for stat in self.sql_stats() {
            write!(
                f,
                "\nsql `{}`: {} statements, avg {:.2} ms",
                stat.name(),
                stat.count(),
                stat.average()
            )?;
        }

        for stat in self.file_stats() {
            write!(f, "\nfile {}: {} rows", stat.path(), stat.rows())?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_is_zero_without_samples() {
        assert_eq!(SqlStat::new("delete").average(), 0.0);
    }

    #[test]
    fn average_truncates_total_to_millis() {
        let stat = SqlStat::new("delete");
        stat.add_time(Duration::from_micros(1_500));
        stat.add_time(Duration::from_micros(2_900));
        stat.add_time(Duration::from_millis(5));

        // 9.4 ms total truncates to 9 ms.
        assert_eq!(stat.count(), 3);
        assert_eq!(stat.average(), 3.0);
    }

    #[test]
    fn sql_stats_are_shared_by_name() {
        let info = DebugInfo::new();
        info.sql_stat("insert").add_time(Duration::from_millis(4));
        info.sql_stat("insert").add_time(Duration::from_millis(2));
        info.sql_stat("delete");

        let stats = info.sql_stats();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].average(), 3.0);
    }

    #[test]
    fn remaining_rows_track_progress() {
        let info = DebugInfo::new();
        for _ in 0..3 {
            info.row_published();
        }

        info.rows_processed(2, true);
        info.rows_processed(5, false);

        assert_eq!(info.remaining_rows(), 1);
        assert_eq!(info.processed_rows(), 7);
        assert!(info.to_string().starts_with("processed rows: 7, remaining rows: 1"));
    }

    #[test]
    fn running_workers_follow_the_latch() {
        let info = DebugInfo::new();
        assert_eq!(info.running_workers(), None);
        assert!(!info.to_string().contains("running workers"));

        let latch = CountDownLatch::new(3);
        info.set_latch(latch.clone());
        latch.count_down();

        assert_eq!(info.running_workers(), Some(2));
        assert!(info.to_string().contains("\nrunning workers: 2"));
    }
}
