use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::shared::ValidationError;

/// Field-level cipher applied to exported values.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionMode {
    /// Values are written as read.
    #[default]
    None,
    /// Byte-wise XOR/shift obfuscation derived from the key.
    Caesar,
    /// AES-128-GCM with a random nonce, base64 encoded.
    Aes,
}

/// Cipher selection together with its key material.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EncryptionConfig {
    #[serde(default)]
    pub mode: EncryptionMode,
    /// Key material. Redacted in debug output.
    #[serde(default)]
    pub key: Option<SecretString>,
}

impl EncryptionConfig {
    /// Returns a configuration that leaves values untouched.
    pub fn none() -> Self {
        Self::default()
    }

    /// Ensures any cipher other than [`EncryptionMode::None`] carries a non-empty key.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.mode == EncryptionMode::None {
            return Ok(());
        }

        match &self.key {
            Some(key) if !key.expose_secret().is_empty() => Ok(()),
            _ => Err(ValidationError::MissingField("encryption.key".to_string())),
        }
    }
}
