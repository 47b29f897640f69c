//! Error types and result definitions for batch operations.
//!
//! [`BatchError`] carries a classified [`ErrorKind`], a static description, optional dynamic
//! detail and the callsite where it was raised. Failures of several workers are aggregated into
//! one error so a run reports every failing worker, not only the first one.
//!
//! Every kind belongs to one [`ErrorCategory`], which decides how the failure is handled:
//! configuration and connectivity errors abort the run, row-processing errors fail only the
//! worker that raised them, and resource-release errors are logged and swallowed.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use batch_config::shared::ValidationError;

/// Convenient result type for batch operations using [`BatchError`] as the error type.
pub type BatchResult<T> = Result<T, BatchError>;

/// Detailed payload stored for single [`BatchError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type for batch operations.
#[derive(Debug, Clone)]
pub struct BatchError {
    repr: ErrorRepr,
}

/// Internal representation of error data.
#[derive(Debug, Clone)]
enum ErrorRepr {
    /// Single error payload holding rich metadata.
    Single(ErrorPayload),
    /// Multiple aggregated errors, typically one per failed worker.
    Many {
        errors: Vec<BatchError>,
        location: &'static Location<'static>,
    },
}

/// How a failure is handled by the executor.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
pub enum ErrorCategory {
    /// Invalid command or option combination. Detected before any I/O and fatal.
    Configuration,
    /// The database could not be reached or refused the credentials. Fatal.
    Connectivity,
    /// A worker failed to render, execute or write a batch. Fails that worker and marks the
    /// run failed; sibling workers keep going.
    RowProcessing,
    /// Closing a connection, file or the pipeline failed. Logged, never rethrown.
    ResourceRelease,
}

/// Specific categories of errors that can occur during batch operations.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Configuration Errors
    ConfigError,
    ValidationError,
    MissingTableMetadata,
    UnsupportedOperation,
    RowCountUnavailable,

    // Connection Errors
    ConnectionFailed,
    AuthenticationError,

    // Query & Execution Errors
    QueryFailed,

    // Data & Transformation Errors
    InvalidData,
    ConversionError,
    EncryptionError,

    // IO Errors
    IoError,

    // Pipeline & Worker Errors
    PipelineHalted,
    InvalidState,
    ConsumerWorkerPanic,
    ProducerWorkerPanic,
    ExportWorkerPanic,
    OperationCancelled,

    // Cleanup Errors
    ResourceReleaseFailed,

    // Unknown / Uncategorized
    Unknown,
}

impl ErrorKind {
    /// Returns the handling category of this kind.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorKind::ConfigError
            | ErrorKind::ValidationError
            | ErrorKind::MissingTableMetadata
            | ErrorKind::UnsupportedOperation
            | ErrorKind::RowCountUnavailable => ErrorCategory::Configuration,
            ErrorKind::ConnectionFailed | ErrorKind::AuthenticationError => {
                ErrorCategory::Connectivity
            }
            ErrorKind::ResourceReleaseFailed => ErrorCategory::ResourceRelease,
            ErrorKind::QueryFailed
            | ErrorKind::InvalidData
            | ErrorKind::ConversionError
            | ErrorKind::EncryptionError
            | ErrorKind::IoError
            | ErrorKind::PipelineHalted
            | ErrorKind::InvalidState
            | ErrorKind::ConsumerWorkerPanic
            | ErrorKind::ProducerWorkerPanic
            | ErrorKind::ExportWorkerPanic
            | ErrorKind::OperationCancelled
            | ErrorKind::Unknown => ErrorCategory::RowProcessing,
        }
    }
}

impl BatchError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For multiple errors, returns the kind of the first error or [`ErrorKind::Unknown`]
    /// if the error list is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s present in this error, flattening aggregates.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    /// Returns the handling category of this error.
    ///
    /// Aggregates report the most severe category among their members, where configuration
    /// outranks connectivity, which outranks row processing.
    pub fn category(&self) -> ErrorCategory {
        let kinds = self.kinds();
        let categories = kinds.iter().map(ErrorKind::category);

        [
            ErrorCategory::Configuration,
            ErrorCategory::Connectivity,
            ErrorCategory::RowProcessing,
        ]
        .into_iter()
        .find(|wanted| categories.clone().any(|category| category == *wanted))
        .unwrap_or(ErrorCategory::ResourceRelease)
    }

    /// Returns the detailed error information if available.
    ///
    /// For multiple errors, returns the detail of the first error that has one.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns the number of leaf errors held by this error.
    pub fn len(&self) -> usize {
        match self.repr {
            ErrorRepr::Single(_) => 1,
            ErrorRepr::Many { ref errors, .. } => errors.iter().map(BatchError::len).sum(),
        }
    }

    /// Returns the captured backtrace for this error.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches an originating [`error::Error`] to this error and returns the modified instance.
    ///
    /// Has no effect on aggregated errors, which forward their first member as the source.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    /// Creates a [`BatchError`] from its components.
    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        BatchError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }
}

impl PartialEq for BatchError {
    fn eq(&self, other: &BatchError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (
                ErrorRepr::Many {
                    errors: errors_a, ..
                },
                ErrorRepr::Many {
                    errors: errors_b, ..
                },
            ) => {
                errors_a.len() == errors_b.len()
                    && errors_a.iter().zip(errors_b.iter()).all(|(a, b)| a == b)
            }
            _ => false,
        }
    }
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                write_detail(payload.detail.as_deref(), f, 1)?;
                write_backtrace(payload.backtrace.as_ref(), f, 1)?;

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                if errors.is_empty() {
                    write!(f, "\n  (no inner errors provided)")?;
                }

                for (index, error) in errors.iter().enumerate() {
                    let rendered = format!("{error}");
                    let mut lines = rendered.lines();
                    match lines.next() {
                        Some(first_line) => write!(f, "\n  {}. {}", index + 1, first_line)?,
                        None => write!(f, "\n  {}.", index + 1)?,
                    }

                    for line in lines {
                        if line.is_empty() {
                            write!(f, "\n     ")?;
                        } else {
                            write!(f, "\n     {line}")?;
                        }
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for BatchError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

/// Writes the captured backtrace with indentation.
fn write_backtrace(
    backtrace: &Backtrace,
    f: &mut fmt::Formatter<'_>,
    indent: usize,
) -> fmt::Result {
    let indent_str = "  ".repeat(indent);

    let rendered_backtrace = format!("{backtrace}");
    if !rendered_backtrace.trim().is_empty() {
        write!(f, "\n{indent_str}Backtrace:")?;
        for line in rendered_backtrace.lines() {
            if line.trim().is_empty() {
                write!(f, "\n{indent_str}  ")?;
            } else {
                write!(f, "\n{indent_str}  {line}")?;
            }
        }
    }

    Ok(())
}

/// Writes the detail block with indentation.
fn write_detail(detail: Option<&str>, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
    let Some(detail) = detail else {
        return Ok(());
    };

    let indent_str = "  ".repeat(indent);
    if detail.trim().is_empty() {
        return write!(f, "\n{indent_str}Detail: <empty>");
    }

    write!(f, "\n{indent_str}Detail:")?;
    for line in detail.lines() {
        if line.trim().is_empty() {
            write!(f, "\n{indent_str}  ")?;
        } else {
            write!(f, "\n{indent_str}  {line}")?;
        }
    }

    Ok(())
}

/// Creates a [`BatchError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for BatchError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> BatchError {
        BatchError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates a [`BatchError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for BatchError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> BatchError {
        BatchError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Aggregates a vector of errors.
///
/// A vector holding exactly one error yields that error unchanged.
impl<E> From<Vec<E>> for BatchError
where
    E: Into<BatchError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> BatchError {
        let location = Location::caller();

        let mut errors: Vec<BatchError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1 {
            return errors.pop().expect("just checked length is 1");
        }

        BatchError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

/// Converts [`std::io::Error`] to [`BatchError`] with [`ErrorKind::IoError`].
impl From<std::io::Error> for BatchError {
    #[track_caller]
    fn from(err: std::io::Error) -> BatchError {
        let detail = err.to_string();
        BatchError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`std::str::Utf8Error`] to [`BatchError`] with [`ErrorKind::ConversionError`].
impl From<std::str::Utf8Error> for BatchError {
    #[track_caller]
    fn from(err: std::str::Utf8Error) -> BatchError {
        let detail = err.to_string();
        BatchError::from_components(
            ErrorKind::ConversionError,
            Cow::Borrowed("UTF-8 conversion failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`std::string::FromUtf8Error`] to [`BatchError`] with [`ErrorKind::ConversionError`].
impl From<std::string::FromUtf8Error> for BatchError {
    #[track_caller]
    fn from(err: std::string::FromUtf8Error) -> BatchError {
        let detail = err.to_string();
        BatchError::from_components(
            ErrorKind::ConversionError,
            Cow::Borrowed("UTF-8 string conversion failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`std::num::ParseIntError`] to [`BatchError`] with [`ErrorKind::ConversionError`].
impl From<std::num::ParseIntError> for BatchError {
    #[track_caller]
    fn from(err: std::num::ParseIntError) -> BatchError {
        let detail = err.to_string();
        BatchError::from_components(
            ErrorKind::ConversionError,
            Cow::Borrowed("Integer parsing failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`ValidationError`] to [`BatchError`] with [`ErrorKind::ValidationError`].
impl From<ValidationError> for BatchError {
    #[track_caller]
    fn from(err: ValidationError) -> BatchError {
        let detail = err.to_string();
        BatchError::from_components(
            ErrorKind::ValidationError,
            Cow::Borrowed("Invalid batch configuration"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`aws_lc_rs::error::Unspecified`] to [`BatchError`] with [`ErrorKind::EncryptionError`].
impl From<aws_lc_rs::error::Unspecified> for BatchError {
    #[track_caller]
    fn from(err: aws_lc_rs::error::Unspecified) -> BatchError {
        BatchError::from_components(
            ErrorKind::EncryptionError,
            Cow::Borrowed("Field encryption failed"),
            None,
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`sqlx::Error`] to [`BatchError`] with the appropriate error kind.
///
/// Rejected credentials (SQLSTATE `28000`) map to [`ErrorKind::AuthenticationError`], transport
/// and pool failures to [`ErrorKind::ConnectionFailed`], and everything else to
/// [`ErrorKind::QueryFailed`].
impl From<sqlx::Error> for BatchError {
    #[track_caller]
    fn from(err: sqlx::Error) -> BatchError {
        let (kind, description) = match &err {
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("28000") => (
                ErrorKind::AuthenticationError,
                "MySQL authentication failed",
            ),
            sqlx::Error::Database(_) => (ErrorKind::QueryFailed, "MySQL statement failed"),
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                (ErrorKind::ConnectionFailed, "MySQL connection failed")
            }
            sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => (
                ErrorKind::ConnectionFailed,
                "MySQL connection pool unavailable",
            ),
            _ => (ErrorKind::QueryFailed, "Database operation failed"),
        };

        let detail = err.to_string();
        BatchError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch_error;

    #[test]
    fn single_vector_is_unwrapped() {
        let err: BatchError = vec![batch_error!(ErrorKind::QueryFailed, "boom")].into();

        assert_eq!(err.kind(), ErrorKind::QueryFailed);
        assert_eq!(err.len(), 1);
    }

    #[test]
    fn aggregate_lists_every_member() {
        let err: BatchError = vec![
            batch_error!(ErrorKind::QueryFailed, "first", "worker 0"),
            batch_error!(ErrorKind::IoError, "second", "worker 1"),
        ]
        .into();

        assert_eq!(err.kinds(), vec![ErrorKind::QueryFailed, ErrorKind::IoError]);
        assert_eq!(err.detail(), Some("worker 0"));

        let rendered = err.to_string();
        assert!(rendered.starts_with("[Many] 2 errors aggregated"));
        assert!(rendered.contains("1. [QueryFailed] first"));
        assert!(rendered.contains("2. [IoError] second"));
    }

    #[test]
    fn aggregate_category_prefers_most_severe() {
        let err: BatchError = vec![
            batch_error!(ErrorKind::QueryFailed, "row"),
            batch_error!(ErrorKind::ConnectionFailed, "down"),
        ]
        .into();

        assert_eq!(err.category(), ErrorCategory::Connectivity);
    }

    #[test]
    fn validation_errors_are_configuration_errors() {
        let err: BatchError = ValidationError::MissingField("command.table".to_string()).into();

        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert!(err.detail().unwrap().contains("command.table"));
    }

    #[test]
    fn release_failures_are_never_fatal_categories() {
        assert_eq!(
            ErrorKind::ResourceReleaseFailed.category(),
            ErrorCategory::ResourceRelease
        );
    }
}
