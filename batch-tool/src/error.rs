use std::backtrace::Backtrace;
use std::error::Error;
use std::fmt;

use batch::error::{BatchError, ErrorCategory};

/// Returns whether terminal output should include backtraces.
fn should_render_backtrace() -> bool {
    matches!(
        std::env::var("RUST_BACKTRACE").as_deref(),
        Ok("1") | Ok("full")
    )
}

/// Result type for the batch tool binary.
pub type ToolResult<T> = Result<T, ToolError>;

/// Captured backtrace wrapper to avoid thiserror's unstable feature detection.
pub struct CapturedBacktrace(Backtrace);

impl CapturedBacktrace {
    fn capture() -> Self {
        Self(Backtrace::capture())
    }
}

impl fmt::Debug for CapturedBacktrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error type for the batch tool binary.
///
/// Wraps [`BatchError`] for failures of the run itself and adds variants for the launcher's own
/// setup.
#[derive(Debug)]
pub enum ToolError {
    /// The run failed.
    Batch(BatchError),
    /// Configuration could not be loaded, validated or applied.
    Config(Box<dyn Error + Send + Sync>, CapturedBacktrace),
    /// I/O error, e.g. while building the runtime.
    Io(std::io::Error, CapturedBacktrace),
}

impl ToolError {
    /// Returns a short category label for this error.
    pub fn category(&self) -> &'static str {
        match self {
            ToolError::Batch(err) => match err.category() {
                ErrorCategory::Configuration => "configuration error",
                ErrorCategory::Connectivity => "connectivity error",
                ErrorCategory::RowProcessing => "row processing error",
                ErrorCategory::ResourceRelease => "resource release error",
            },
            ToolError::Config(_, _) => "configuration error",
            ToolError::Io(_, _) => "i/o error",
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self {
            ToolError::Batch(err) => err.backtrace(),
            ToolError::Config(_, cb) => Some(&cb.0),
            ToolError::Io(_, cb) => Some(&cb.0),
        }
    }

    /// Creates a configuration error from any source.
    pub fn config<E: Error + Send + Sync + 'static>(err: E) -> Self {
        ToolError::Config(Box::new(err), CapturedBacktrace::capture())
    }

    /// Returns a user-oriented report for terminal output.
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        out.push_str("batch-tool failed\n");
        out.push_str(&format!("category: {}\n", self.category()));
        out.push_str(&format!("error: {self}\n"));

        let mut source = self.source();
        while let Some(err) = source {
            out.push_str(&format!("caused by: {err}\n"));
            source = err.source();
        }

        if should_render_backtrace() {
            if let Some(backtrace) = self.backtrace() {
                out.push_str(&format!("backtrace:\n{backtrace}\n"));
            }
        }

        out
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::Batch(err) => write!(f, "{err}"),
            ToolError::Config(err, _) => write!(f, "configuration error: {err}"),
            ToolError::Io(err, _) => write!(f, "i/o error: {err}"),
        }
    }
}

impl Error for ToolError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ToolError::Batch(err) => err.source(),
            ToolError::Config(err, _) => Some(err.as_ref()),
            ToolError::Io(err, _) => Some(err),
        }
    }
}

impl From<BatchError> for ToolError {
    fn from(err: BatchError) -> Self {
        ToolError::Batch(err)
    }
}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        ToolError::Io(err, CapturedBacktrace::capture())
    }
}

#[cfg(test)]
mod tests {
    use batch::error::ErrorKind;

    use super::*;

    #[test]
    fn batch_errors_keep_their_category() {
        let err = ToolError::from(BatchError::from((
            ErrorKind::ConnectionFailed,
            "Could not connect",
        )));

        assert_eq!(err.category(), "connectivity error");
        assert!(err.render_report().starts_with("batch-tool failed\ncategory: connectivity error\n"));
    }

    #[test]
    fn config_report_lists_the_cause() {
        let err = ToolError::config(std::io::Error::other("missing base.yaml"));

        let report = err.render_report();
        assert!(report.contains("category: configuration error"));
        assert!(report.contains("caused by: missing base.yaml"));
    }
}
