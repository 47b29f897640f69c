use serde::{Deserialize, Serialize};

use crate::shared::{MySqlConnectionConfig, ValidationError};

/// How many tasks may publish into the event pipeline concurrently.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ProducerMode {
    /// Exactly one publisher. Slot claims skip the compare-and-swap.
    Single,
    /// Any number of publishers, e.g. one per input file.
    #[default]
    Multi,
}

/// Sizing of the event pipeline and the worker pool around it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PipelineConfig {
    /// Number of slots in the ring buffer. Must be a power of two of at least 2.
    #[serde(default = "default_ring_buffer_size")]
    pub ring_buffer_size: usize,
    /// Whether one or many producers publish into the pipeline.
    #[serde(default)]
    pub producer_mode: ProducerMode,
    /// Number of consumer workers attached to the pipeline.
    #[serde(default = "default_consumers")]
    pub consumers: usize,
    /// Maximum number of producers (file readers, shard readers or export workers) running
    /// at the same time.
    #[serde(default = "default_producers")]
    pub producers: usize,
    /// Rows buffered by a consumer before a statement is flushed.
    #[serde(default = "default_flush_max_rows")]
    pub flush_max_rows: usize,
    /// Bytes buffered by a consumer before a statement is flushed.
    #[serde(default = "default_flush_max_bytes")]
    pub flush_max_bytes: usize,
}

impl PipelineConfig {
    pub const DEFAULT_RING_BUFFER_SIZE: usize = 1024;

    pub const MIN_RING_BUFFER_SIZE: usize = 2;

    pub const DEFAULT_PRODUCERS: usize = 4;

    pub const DEFAULT_FLUSH_MAX_ROWS: usize = 200;

    pub const DEFAULT_FLUSH_MAX_BYTES: usize = 1024 * 1024;

    /// Validates pipeline sizing.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.ring_buffer_size < Self::MIN_RING_BUFFER_SIZE
            || !self.ring_buffer_size.is_power_of_two()
        {
            return Err(ValidationError::invalid(
                "pipeline.ring_buffer_size",
                "must be a power of two of at least 2",
            ));
        }

        if self.consumers == 0 {
            return Err(ValidationError::invalid(
                "pipeline.consumers",
                "must be greater than 0",
            ));
        }

        if self.producers == 0 {
            return Err(ValidationError::invalid(
                "pipeline.producers",
                "must be greater than 0",
            ));
        }

        if self.flush_max_rows == 0 || self.flush_max_bytes == 0 {
            return Err(ValidationError::invalid(
                "pipeline.flush_max_rows",
                "flush thresholds must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ring_buffer_size: default_ring_buffer_size(),
            producer_mode: ProducerMode::default(),
            consumers: default_consumers(),
            producers: default_producers(),
            flush_max_rows: default_flush_max_rows(),
            flush_max_bytes: default_flush_max_bytes(),
        }
    }
}

fn default_ring_buffer_size() -> usize {
    PipelineConfig::DEFAULT_RING_BUFFER_SIZE
}

/// Four consumers per available core, since consumers mostly wait on the database.
///
/// Every consumer holds a pooled connection for the whole run, so the default never exceeds
/// the default pool size.
fn default_consumers() -> usize {
    let per_core = std::thread::available_parallelism()
        .map(|cores| cores.get())
        .unwrap_or(1)
        * 4;

    per_core.min(MySqlConnectionConfig::DEFAULT_MAX_CONNECTIONS as usize)
}

fn default_producers() -> usize {
    PipelineConfig::DEFAULT_PRODUCERS
}

fn default_flush_max_rows() -> usize {
    PipelineConfig::DEFAULT_FLUSH_MAX_ROWS
}

fn default_flush_max_bytes() -> usize {
    PipelineConfig::DEFAULT_FLUSH_MAX_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = PipelineConfig::default();

        assert!(config.validate().is_ok());
        assert!(config.consumers >= 4);
        assert_eq!(config.producer_mode, ProducerMode::Multi);
    }

    #[test]
    fn ring_buffer_size_must_be_power_of_two() {
        let config = PipelineConfig {
            ring_buffer_size: 1000,
            ..PipelineConfig::default()
        };

        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidFieldValue { field, .. }) if field == "pipeline.ring_buffer_size"
        ));
    }

    #[test]
    fn zero_consumers_are_rejected() {
        let config = PipelineConfig {
            consumers: 0,
            ..PipelineConfig::default()
        };

        assert!(config.validate().is_err());
    }
}
