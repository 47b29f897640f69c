//! Testing utilities for batch runs.
//!
//! - [`source`] provides [`source::MemoryDataSource`], a data source that records statements,
//!   serves canned results and injects failures.
//! - [`table`] describes tables and their shards and registers their metadata on a source.
//! - [`notify`] wraps [`tokio::sync::Notify`] with a timeout so waiting tests fail instead of
//!   hanging.

pub mod notify;
pub mod source;
pub mod table;
