use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::shared::{EncryptionConfig, MaskConfig, ValidationError};

/// Default field separator for data files.
pub const DEFAULT_SEPARATOR: &str = ",";

/// Separators that collide with quoting, escaping or the legacy multi-byte delimiter.
const ILLEGAL_SEPARATORS: &[&str] = &["\"", "\\", "|@|"];

/// How exported rows are distributed across output files.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "kind", content = "limit", rename_all = "snake_case")]
pub enum ExportWay {
    /// A single file per exporting worker.
    #[default]
    Default,
    /// Roll to a new file every `limit` rows.
    MaxLineNumInSingleFile(u64),
    /// Produce `limit` files of (nearly) equal row counts.
    FixedFileNum(u64),
}

/// Controls how values are enclosed in double quotes when written.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum QuoteMode {
    /// Quote string values only when they contain the separator, a quote or a line break.
    #[default]
    Auto,
    /// Quote every non-NULL value.
    Force,
    /// Never quote.
    None,
}

/// Compression of data files, both read and written.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum CompressionMode {
    #[default]
    None,
    Gzip,
}

impl CompressionMode {
    /// File name suffix for this compression.
    pub fn extension_suffix(&self) -> &'static str {
        match self {
            CompressionMode::None => "",
            CompressionMode::Gzip => ".gz",
        }
    }
}

/// Settings of an export run.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExportConfig {
    #[serde(default)]
    pub way: ExportWay,
    #[serde(default = "default_separator")]
    pub separator: String,
    #[serde(default)]
    pub quote_mode: QuoteMode,
    #[serde(default)]
    pub compression: CompressionMode,
    /// Write the column names as the first line of every file.
    #[serde(default)]
    pub with_header: bool,
    /// Columns of the `ORDER BY` clause. Empty for unordered export.
    #[serde(default)]
    pub order_by: Vec<String>,
    #[serde(default = "default_ascending")]
    pub ascending: bool,
    /// Extra predicate appended as `WHERE ...` to every select.
    #[serde(default)]
    pub where_condition: Option<String>,
    /// Directory (with trailing separator) that receives the files.
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub filename_prefix: String,
    #[serde(default)]
    pub encryption: EncryptionConfig,
    /// Masks applied to the named columns before encryption.
    #[serde(default)]
    pub masks: BTreeMap<String, MaskConfig>,
}

impl ExportConfig {
    /// Validates separator, file limits and cipher settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_separator("export.separator", &self.separator)?;

        match self.way {
            ExportWay::MaxLineNumInSingleFile(0) | ExportWay::FixedFileNum(0) => {
                return Err(ValidationError::invalid(
                    "export.way.limit",
                    "must be greater than 0",
                ));
            }
            _ => {}
        }

        if self.order_by.iter().any(|column| column.trim().is_empty()) {
            return Err(ValidationError::invalid(
                "export.order_by",
                "column names must not be empty",
            ));
        }

        for (column, mask) in &self.masks {
            mask.validate(column)?;
        }

        self.encryption.validate()
    }

    /// Returns whether rows must be exported in server-side sort order.
    pub fn is_ordered(&self) -> bool {
        !self.order_by.is_empty()
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            way: ExportWay::default(),
            separator: default_separator(),
            quote_mode: QuoteMode::default(),
            compression: CompressionMode::default(),
            with_header: false,
            order_by: Vec::new(),
            ascending: default_ascending(),
            where_condition: None,
            path: String::new(),
            filename_prefix: String::new(),
            encryption: EncryptionConfig::default(),
            masks: BTreeMap::new(),
        }
    }
}

/// Rejects empty separators, the reserved ones, and separators containing letters or digits.
pub fn validate_separator(field: &str, separator: &str) -> Result<(), ValidationError> {
    if separator.is_empty() {
        return Err(ValidationError::invalid(field, "must not be empty"));
    }

    if ILLEGAL_SEPARATORS.iter().any(|illegal| separator.contains(illegal)) {
        return Err(ValidationError::invalid(
            field,
            format!("`{separator}` is reserved and cannot be used as a separator"),
        ));
    }

    if separator.chars().any(|c| c.is_alphanumeric()) {
        return Err(ValidationError::invalid(
            field,
            "must not contain letters or digits",
        ));
    }

    Ok(())
}

pub(crate) fn default_separator() -> String {
    DEFAULT_SEPARATOR.to_string()
}

fn default_ascending() -> bool {
    true
}
