//! Shared configuration types for batch runs.

mod base;
mod connection;
mod encryption;
mod export;
mod mask;
mod pipeline;
mod tool;
mod write_db;

pub use base::ValidationError;
pub use connection::{IntoConnectOptions, MySqlConnectionConfig};
pub use encryption::{EncryptionConfig, EncryptionMode};
pub use export::{
    CompressionMode, DEFAULT_SEPARATOR, ExportConfig, ExportWay, QuoteMode, validate_separator,
};
pub use mask::{MAX_MASK_SALT_LEN, MaskConfig, ShowRegion};
pub use pipeline::{PipelineConfig, ProducerMode};
pub use tool::{
    BatchToolConfig, CommandConfig, DEFAULT_HINT_TEMPLATE, HINT_GROUP_PLACEHOLDER, Operation,
    ShardingConfig,
};
pub use write_db::WriteDbConfig;
