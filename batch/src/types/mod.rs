//! Core data types shared by producers, consumers and export workers.
//!
//! Table metadata ([`PrimaryKey`], [`FieldMetaInfo`], [`PartitionKey`], [`TableTopology`]) is
//! loaded once per run and never changes afterwards. [`RowEvent`] is the unit that flows through
//! the event pipeline.

mod event;
mod table;

pub use event::*;
pub use table::*;
