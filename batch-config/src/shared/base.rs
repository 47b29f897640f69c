use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A field holds a value outside its allowed range or shape.
    #[error("Invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
    /// A field required by the selected operation is missing.
    #[error("Missing required field `{0}`")]
    MissingField(String),
}

impl ValidationError {
    pub(crate) fn invalid(field: &str, constraint: impl Into<String>) -> Self {
        ValidationError::InvalidFieldValue {
            field: field.to_string(),
            constraint: constraint.into(),
        }
    }
}
