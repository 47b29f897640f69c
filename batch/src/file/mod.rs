//! Flat data file handling: splitting input lines, formatting output rows, and reading and
//! writing (optionally gzip compressed) files.
//!
//! File I/O is blocking and runs on tokio's blocking pool; callers stay async.

mod format;
mod reader;
mod split;
mod writer;

pub use format::*;
pub use reader::*;
pub use split::*;
pub use writer::*;

use crate::batch_error;
use crate::error::{BatchResult, ErrorKind};

/// Runs blocking file work on the blocking pool.
pub(crate) async fn run_blocking<T, F>(work: F) -> BatchResult<T>
where
    F: FnOnce() -> BatchResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|err| {
        batch_error!(
            ErrorKind::IoError,
            "Blocking file task did not complete",
            err.to_string()
        )
    })?
}
