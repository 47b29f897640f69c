use std::borrow::Cow;
use std::sync::Arc;

use batch_config::shared::QuoteMode;

use crate::cipher::FieldCipher;
use crate::error::BatchResult;
use crate::mask::DataMasker;
use crate::types::{FieldMetaInfo, FieldType, NULL_MARKER, is_null};

/// Turns rows into data file lines.
///
/// `NULL` is written as `\N`. Inside quotes `"` is doubled. Column masks run first, then the
/// cipher, when present, replaces every non-`NULL` value before quoting is decided.
#[derive(Debug, Clone)]
pub struct RowFormatter {
    separator: String,
    quote_mode: QuoteMode,
    string_columns: Vec<bool>,
    cipher: Option<Arc<FieldCipher>>,
    maskers: Vec<Option<DataMasker>>,
}

impl RowFormatter {
    pub fn new(
        separator: impl Into<String>,
        quote_mode: QuoteMode,
        fields: &[FieldMetaInfo],
        cipher: Option<Arc<FieldCipher>>,
    ) -> Self {
        Self {
            separator: separator.into(),
            quote_mode,
            string_columns: fields
                .iter()
                .map(|field| field.field_type == FieldType::String)
                .collect(),
            cipher,
            maskers: Vec::new(),
        }
    }

    /// Masks values by column position. Columns past the end of `maskers` stay unmasked.
    pub fn with_maskers(mut self, maskers: Vec<Option<DataMasker>>) -> Self {
        self.maskers = maskers;
        self
    }

    /// Appends one line for nullable values read from the database.
    pub fn format_values(&self, values: &[Option<String>], out: &mut Vec<u8>) -> BatchResult<()> {
        self.format(values.iter().map(Option::as_deref), out)
    }

    /// Appends one line for pipeline fields, where `NULL` is already the `\N` marker.
    pub fn format_fields(&self, fields: &[String], out: &mut Vec<u8>) -> BatchResult<()> {
        self.format(
            fields
                .iter()
                .map(|field| (!is_null(field)).then_some(field.as_str())),
            out,
        )
    }

    fn format<'a>(
        &self,
        values: impl Iterator<Item = Option<&'a str>>,
        out: &mut Vec<u8>,
    ) -> BatchResult<()> {
        for (column, value) in values.enumerate() {
            if column > 0 {
                out.extend_from_slice(self.separator.as_bytes());
            }

            let Some(value) = value else {
                out.extend_from_slice(NULL_MARKER.as_bytes());
                continue;
            };

            let mut value = Cow::Borrowed(value);
            if let Some(Some(masker)) = self.maskers.get(column) {
                value = Cow::Owned(masker.mask(&value));
            }
            if let Some(cipher) = &self.cipher {
                value = Cow::Owned(cipher.encrypt(value.as_bytes())?);
            }
            let value: &str = &value;

            if self.needs_quote(column, value) {
                out.push(b'"');
                for byte in value.bytes() {
                    if byte == b'"' {
                        out.push(b'"');
                    }
                    out.push(byte);
                }
                out.push(b'"');
            } else {
                out.extend_from_slice(value.as_bytes());
            }
        }
        out.push(b'\n');

        Ok(())
    }

    fn needs_quote(&self, column: usize, value: &str) -> bool {
        match self.quote_mode {
            QuoteMode::None => false,
            QuoteMode::Force => true,
            QuoteMode::Auto => {
                self.string_columns.get(column).copied().unwrap_or(true)
                    && (value.contains(self.separator.as_str())
                        || value.contains(['"', '\r', '\n']))
            }
        }
    }

    /// Column names joined by the separator, followed by a newline.
    pub fn header_line(&self, fields: &[FieldMetaInfo]) -> Vec<u8> {
        let names: Vec<_> = fields.iter().map(|field| field.name.as_str()).collect();
        let mut line = names.join(&self.separator).into_bytes();
        line.push(b'\n');
        line
    }
}
