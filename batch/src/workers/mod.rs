//! Workers of a batch run.
//!
//! Producers publish row events into the pipeline, consumers claim them and flush batches through
//! a strategy into a sink. Direct export workers bypass the pipeline and stream a query straight
//! into files.

pub mod consumer;
pub mod export;
pub mod pool;
pub mod producer;
pub mod sink;
pub mod strategy;
