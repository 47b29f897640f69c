//! Concurrency primitives coordinating producers, consumers and the executor.
//!
//! - [`pipeline`] is the bounded ring buffer that carries rows from producers to consumers.
//! - [`latch`] lets the executor wait for a fixed number of workers to finish, including
//!   workers that failed.
//! - [`shutdown`] broadcasts a stop request, e.g. on Ctrl-C.

pub mod latch;
pub mod pipeline;
pub mod shutdown;
