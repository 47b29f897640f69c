//! Logging and metrics setup shared by the batch tool and its tests.

pub mod metrics;
pub mod tracing;
