use serde::Deserialize;

use crate::shared::ValidationError;

/// Longest accepted hash salt, in bytes.
pub const MAX_MASK_SALT_LEN: usize = 16;

/// Character range (inclusive on both ends) left visible by a hiding mask.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
pub struct ShowRegion {
    pub start: usize,
    pub end: usize,
}

/// Transformation applied to one exported column before it is written.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MaskConfig {
    /// Replaces characters with `*`, except those in the visible regions.
    Hiding {
        /// Number of trailing characters left visible.
        #[serde(default)]
        show_end: Option<usize>,
        #[serde(default)]
        show_regions: Vec<ShowRegion>,
    },
    /// Replaces the value by the base64 SHA-256 digest of the value and the salt.
    Hash {
        #[serde(default)]
        salt: Option<String>,
    },
}

impl MaskConfig {
    pub fn validate(&self, column: &str) -> Result<(), ValidationError> {
        let field = || format!("export.masks.{column}");

        match self {
            MaskConfig::Hiding {
                show_end,
                show_regions,
            } => {
                if show_end.is_none() && show_regions.is_empty() {
                    return Err(ValidationError::invalid(
                        &field(),
                        "hiding needs `show_end` or at least one show region",
                    ));
                }
                if let Some(region) = show_regions.iter().find(|region| region.start > region.end)
                {
                    return Err(ValidationError::invalid(
                        &field(),
                        format!("show region {}-{} is reversed", region.start, region.end),
                    ));
                }
            }
            MaskConfig::Hash { salt: Some(salt) } if salt.len() > MAX_MASK_SALT_LEN => {
                return Err(ValidationError::invalid(
                    &field(),
                    format!("salt must be at most {MAX_MASK_SALT_LEN} bytes"),
                ));
            }
            MaskConfig::Hash { .. } => {}
        }

        Ok(())
    }
}
