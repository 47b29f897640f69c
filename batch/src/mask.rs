//! Column masks applied to exported values.

use std::collections::BTreeMap;

use aws_lc_rs::digest::{Context, SHA256};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use batch_config::shared::{MaskConfig, ShowRegion};

use crate::bail;
use crate::error::{BatchResult, ErrorKind};
use crate::types::FieldMetaInfo;

const HIDING_CHAR: char = '*';

/// A configured column mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataMasker {
    Hiding {
        show_end: usize,
        show_regions: Vec<ShowRegion>,
    },
    Hash {
        salt: Option<Vec<u8>>,
    },
}

impl DataMasker {
    pub fn from_config(config: &MaskConfig) -> Self {
        match config {
            MaskConfig::Hiding {
                show_end,
                show_regions,
            } => DataMasker::Hiding {
                show_end: show_end.unwrap_or(0),
                show_regions: show_regions.clone(),
            },
            MaskConfig::Hash { salt } => DataMasker::Hash {
                salt: salt.as_ref().map(|salt| salt.as_bytes().to_vec()),
            },
        }
    }

    pub fn mask(&self, value: &str) -> String {
        match self {
            DataMasker::Hiding {
                show_end,
                show_regions,
            } => {
                let len = value.chars().count();
                value
                    .chars()
                    .enumerate()
                    .map(|(index, c)| {
                        let visible = index + show_end >= len
                            || show_regions
                                .iter()
                                .any(|region| (region.start..=region.end).contains(&index));
                        if visible { c } else { HIDING_CHAR }
                    })
                    .collect()
            }
            DataMasker::Hash { salt } => {
                let mut digest = Context::new(&SHA256);
                digest.update(value.as_bytes());
                if let Some(salt) = salt {
                    digest.update(salt);
                }
                STANDARD.encode(digest.finish())
            }
        }
    }
}

/// Resolves configured masks to column positions of `fields`.
///
/// Fails when a mask names a column the table does not have.
pub fn column_maskers(
    masks: &BTreeMap<String, MaskConfig>,
    fields: &[FieldMetaInfo],
) -> BatchResult<Vec<Option<DataMasker>>> {
    let mut maskers = vec![None; fields.len()];

    for (column, config) in masks {
        let Some(position) = fields
            .iter()
            .position(|field| field.name.eq_ignore_ascii_case(column))
        else {
            bail!(
                ErrorKind::ConfigError,
                "Masked column is not part of the table",
                format!("column `{column}`")
            );
        };
        maskers[position] = Some(DataMasker::from_config(config));
    }

    Ok(maskers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldType;

    fn hiding(show_end: usize, show_regions: &[(usize, usize)]) -> DataMasker {
        DataMasker::Hiding {
            show_end,
            show_regions: show_regions
                .iter()
                .map(|&(start, end)| ShowRegion { start, end })
                .collect(),
        }
    }

    #[test]
    fn hiding_keeps_tail_and_regions() {
        assert_eq!(hiding(4, &[]).mask("13812345678"), "*******5678");
        assert_eq!(hiding(0, &[(0, 2)]).mask("13812345678"), "138********");
        assert_eq!(hiding(2, &[(0, 0)]).mask("abcdef"), "a***ef");
    }

    #[test]
    fn hiding_counts_characters_not_bytes() {
        assert_eq!(hiding(1, &[]).mask("张三丰"), "**丰");
    }

    #[test]
    fn short_values_stay_visible() {
        assert_eq!(hiding(8, &[]).mask("abc"), "abc");
    }

    #[test]
    fn hash_is_stable_and_salted() {
        let plain = DataMasker::Hash { salt: None };
        let salted = DataMasker::Hash {
            salt: Some(b"pepper".to_vec()),
        };

        assert_eq!(plain.mask("alice"), plain.mask("alice"));
        assert_ne!(plain.mask("alice"), plain.mask("bob"));
        assert_ne!(plain.mask("alice"), salted.mask("alice"));
        assert_eq!(STANDARD.decode(plain.mask("alice")).unwrap().len(), 32);
    }

    #[test]
    fn masks_resolve_to_column_positions() {
        let fields = vec![
            FieldMetaInfo::new("id", FieldType::Int, 0),
            FieldMetaInfo::new("phone", FieldType::String, 1),
        ];
        let masks = BTreeMap::from([("PHONE".to_string(), MaskConfig::Hash { salt: None })]);

        let maskers = column_maskers(&masks, &fields).unwrap();
        assert_eq!(maskers, vec![None, Some(DataMasker::Hash { salt: None })]);

        let unknown = BTreeMap::from([("email".to_string(), MaskConfig::Hash { salt: None })]);
        let err = column_maskers(&unknown, &fields).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }
}
