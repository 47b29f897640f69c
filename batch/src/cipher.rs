//! Field-level ciphers applied to exported values.
//!
//! Both ciphers produce base64 text so encrypted values never contain separators, quotes or line
//! breaks. Key material is read from the configuration's [`SecretString`] once, when the cipher
//! is built, and lives only as long as the cipher.

use aws_lc_rs::aead::{AES_128_GCM, Aad, NONCE_LEN, Nonce, RandomizedNonceKey};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use batch_config::shared::{EncryptionConfig, EncryptionMode};
use secrecy::{ExposeSecret, SecretString};

use crate::bail;
use crate::error::{BatchResult, ErrorKind};
use crate::types::jvm_string_hash;

/// AES-128 key length in bytes. Shorter keys are zero padded, longer ones truncated.
const AES_KEY_LEN: usize = 16;

/// A configured field cipher.
pub enum FieldCipher {
    /// Byte-wise `(b ^ mask) - mask` with a mask derived from the key's hash.
    Caesar { mask: u8 },
    /// AES-128-GCM with a random nonce prepended to the ciphertext.
    Aes { key: Box<RandomizedNonceKey> },
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldCipher::Caesar { .. } => f.write_str("FieldCipher::Caesar"),
            FieldCipher::Aes { .. } => f.write_str("FieldCipher::Aes"),
        }
    }
}

impl FieldCipher {
    /// Builds the cipher selected by `config`, or `None` when encryption is disabled.
    pub fn from_config(config: &EncryptionConfig) -> BatchResult<Option<Self>> {
        if config.mode == EncryptionMode::None {
            return Ok(None);
        }

        let Some(key) = config.key.as_ref().filter(|key| !key.expose_secret().is_empty()) else {
            bail!(
                ErrorKind::ConfigError,
                "Field encryption requires a key",
                format!("cipher {:?} has no key", config.mode)
            );
        };

        let cipher = match config.mode {
            EncryptionMode::None => return Ok(None),
            EncryptionMode::Caesar => Self::caesar(key),
            EncryptionMode::Aes => Self::aes(key)?,
        };

        Ok(Some(cipher))
    }

    pub fn caesar(key: &SecretString) -> Self {
        let mask = (jvm_string_hash(key.expose_secret()) & 0xFF) as u8;
        FieldCipher::Caesar { mask }
    }

    pub fn aes(key: &SecretString) -> BatchResult<Self> {
        let mut key_bytes = [0u8; AES_KEY_LEN];
        let raw = key.expose_secret().as_bytes();
        let len = raw.len().min(AES_KEY_LEN);
        key_bytes[..len].copy_from_slice(&raw[..len]);

        let key = RandomizedNonceKey::new(&AES_128_GCM, &key_bytes)?;
        Ok(FieldCipher::Aes { key: Box::new(key) })
    }

    /// Encrypts `plain` and returns base64 text.
    pub fn encrypt(&self, plain: &[u8]) -> BatchResult<String> {
        match self {
            FieldCipher::Caesar { mask } => {
                let crypto: Vec<u8> = plain
                    .iter()
                    .map(|b| (b ^ mask).wrapping_sub(*mask))
                    .collect();
                Ok(STANDARD.encode(crypto))
            }
            FieldCipher::Aes { key } => {
                let mut in_out = plain.to_vec();
                let nonce = key.seal_in_place_append_tag(Aad::empty(), &mut in_out)?;

                let nonce_bytes: &[u8; NONCE_LEN] = nonce.as_ref();
                let mut output = Vec::with_capacity(NONCE_LEN + in_out.len());
                output.extend_from_slice(nonce_bytes);
                output.extend_from_slice(&in_out);
                Ok(STANDARD.encode(output))
            }
        }
    }

    /// Reverses [`FieldCipher::encrypt`].
    pub fn decrypt(&self, encoded: &str) -> BatchResult<Vec<u8>> {
        let Ok(crypto) = STANDARD.decode(encoded) else {
            bail!(
                ErrorKind::EncryptionError,
                "Encrypted value is not valid base64"
            );
        };

        match self {
            FieldCipher::Caesar { mask } => Ok(crypto
                .iter()
                .map(|b| b.wrapping_add(*mask) ^ mask)
                .collect()),
            FieldCipher::Aes { key } => {
                if crypto.len() < NONCE_LEN {
                    bail!(
                        ErrorKind::EncryptionError,
                        "Encrypted value is shorter than its nonce"
                    );
                }

                let (nonce, sealed) = crypto.split_at(NONCE_LEN);
                let nonce = Nonce::try_assume_unique_for_key(nonce)?;
                let mut sealed = sealed.to_vec();
                let plain = key.open_in_place(nonce, Aad::empty(), &mut sealed)?;

                Ok(plain.to_vec())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(key: &str) -> SecretString {
        SecretString::new(key.to_string())
    }

    #[test]
    fn caesar_round_trips_and_obfuscates() {
        let cipher = FieldCipher::caesar(&secret("key"));

        let encrypted = cipher.encrypt("hello, world".as_bytes()).unwrap();
        assert_ne!(encrypted, STANDARD.encode("hello, world"));
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), b"hello, world");
    }

    #[test]
    fn aes_uses_fresh_nonces() {
        let cipher = FieldCipher::aes(&secret("a-short-key")).unwrap();

        let first = cipher.encrypt(b"secret").unwrap();
        let second = cipher.encrypt(b"secret").unwrap();

        assert_ne!(first, second);
        assert_eq!(cipher.decrypt(&first).unwrap(), b"secret");
        assert_eq!(cipher.decrypt(&second).unwrap(), b"secret");
    }

    #[test]
    fn tampered_aes_value_fails() {
        let cipher = FieldCipher::aes(&secret("0123456789abcdef-long")).unwrap();
        let mut raw = STANDARD.decode(cipher.encrypt(b"secret").unwrap()).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 1;

        let err = cipher.decrypt(&STANDARD.encode(raw)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EncryptionError);
    }

    #[test]
    fn disabled_and_keyless_configs() {
        assert!(
            FieldCipher::from_config(&EncryptionConfig::none())
                .unwrap()
                .is_none()
        );

        let keyless = EncryptionConfig {
            mode: EncryptionMode::Aes,
            key: None,
        };
        let err = FieldCipher::from_config(&keyless).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }
}
