use std::path::{Path, PathBuf};

use batch_config::shared::{ExportConfig, PipelineConfig, ProducerMode};
use tempfile::TempDir;

/// A small pipeline so tests exercise wrap-around and backpressure.
pub fn pipeline_config(consumers: usize, flush_max_rows: usize) -> PipelineConfig {
    PipelineConfig {
        ring_buffer_size: 8,
        producer_mode: ProducerMode::Multi,
        consumers,
        producers: 2,
        flush_max_rows,
        flush_max_bytes: 1024 * 1024,
    }
}

pub fn write_data_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

/// Export config writing into `dir`.
pub fn export_config(dir: &TempDir) -> ExportConfig {
    ExportConfig {
        path: format!("{}/", dir.path().display()),
        ..ExportConfig::default()
    }
}

pub fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_else(|err| panic!("cannot read {}: {err}", path.display()))
        .lines()
        .map(str::to_string)
        .collect()
}

/// `count` rows `(id, name_id)` starting at `first_id`.
pub fn id_name_rows(first_id: usize, count: usize) -> Vec<(String, String)> {
    (first_id..first_id + count)
        .map(|id| (id.to_string(), format!("name_{id}")))
        .collect()
}

pub fn as_values(rows: &[(String, String)]) -> Vec<Vec<Option<&str>>> {
    rows.iter()
        .map(|(id, name)| vec![Some(id.as_str()), Some(name.as_str())])
        .collect()
}
