//! Configuration for the batch tool.
//!
//! Types are deserialized from layered files (see [`load::load_config`]) and validated before
//! a run starts, so the engine only ever sees consistent settings.

pub mod environment;
pub mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{Config, LoadConfigError, load_config, load_config_from};
