pub mod cipher;
pub mod concurrency;
pub mod context;
pub mod error;
pub mod executor;
pub mod file;
mod macros;
pub mod mask;
pub mod metrics;
pub mod source;
pub mod sql;
pub mod stats;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod workers;
