/// Marker used in data files for a SQL `NULL` value.
pub const NULL_MARKER: &str = "\\N";

/// One row's field values, as read from a data file or a result cursor.
///
/// `NULL` values are carried as [`NULL_MARKER`], so a row read from the database and a row read
/// from a file look the same to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RowEvent {
    /// Field values in column order.
    pub fields: Vec<String>,
    /// Index of the producer (input file or shard cursor) the row came from.
    pub source: usize,
}

impl RowEvent {
    pub fn new(fields: Vec<String>, source: usize) -> Self {
        Self { fields, source }
    }

    /// Builds an event from nullable values, replacing `None` with [`NULL_MARKER`].
    pub fn from_nullable(values: Vec<Option<String>>, source: usize) -> Self {
        let fields = values
            .into_iter()
            .map(|value| value.unwrap_or_else(|| NULL_MARKER.to_string()))
            .collect();

        Self { fields, source }
    }

    /// Approximate number of payload bytes, used for flush thresholds.
    pub fn size_hint(&self) -> usize {
        self.fields.iter().map(|field| field.len() + 1).sum()
    }
}

/// Returns whether `value` represents SQL `NULL`.
pub fn is_null(value: &str) -> bool {
    value == NULL_MARKER
}
