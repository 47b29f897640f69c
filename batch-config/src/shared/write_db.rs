use serde::Deserialize;

use crate::shared::export::{default_separator, validate_separator};
use crate::shared::{CompressionMode, EncryptionConfig, ValidationError};

/// Settings shared by import and delete runs, which both read data files into the database.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WriteDbConfig {
    #[serde(default = "default_separator")]
    pub separator: String,
    /// Skip the first line of every input file.
    #[serde(default)]
    pub with_header: bool,
    /// Lines end with a trailing separator that is not a field boundary.
    #[serde(default)]
    pub with_last_sep: bool,
    /// Render `INSERT IGNORE` instead of `INSERT`.
    #[serde(default)]
    pub insert_ignore: bool,
    /// Escape string values for MySQL before inlining them.
    #[serde(default = "default_sql_escape")]
    pub sql_escape: bool,
    /// Explicit insert column list. When empty, values follow the table's column order.
    #[serde(default)]
    pub columns: Vec<String>,
    /// Extra predicate appended to every delete statement.
    #[serde(default)]
    pub where_condition: Option<String>,
    /// Compression of the input files.
    #[serde(default)]
    pub compression: CompressionMode,
    /// Cipher the input files were exported with. Every non-`NULL` field is decrypted.
    #[serde(default)]
    pub encryption: EncryptionConfig,
}

impl WriteDbConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_separator("write.separator", &self.separator)?;
        self.encryption.validate()
    }
}

impl Default for WriteDbConfig {
    fn default() -> Self {
        Self {
            separator: default_separator(),
            with_header: false,
            with_last_sep: false,
            insert_ignore: false,
            sql_escape: default_sql_escape(),
            columns: Vec::new(),
            where_condition: None,
            compression: CompressionMode::default(),
            encryption: EncryptionConfig::none(),
        }
    }
}

fn default_sql_escape() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;
    use crate::shared::EncryptionMode;

    #[test]
    fn encryption_is_read_and_validated() {
        let config: WriteDbConfig =
            serde_json::from_str(r#"{"encryption":{"mode":"caesar","key":"k"}}"#).unwrap();
        assert_eq!(config.encryption.mode, EncryptionMode::Caesar);
        assert!(config.validate().is_ok());

        let keyless = WriteDbConfig {
            encryption: EncryptionConfig {
                mode: EncryptionMode::Aes,
                key: Some(SecretString::new(String::new())),
            },
            ..WriteDbConfig::default()
        };
        assert_eq!(
            keyless.validate(),
            Err(ValidationError::MissingField("encryption.key".to_string()))
        );
    }
}
