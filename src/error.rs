//! Unified error type for monitor operations.
//!
//! Usage errors (blank labels, duplicate declarations, stopping a section
//! that is not running, ...) never abort a measurement run: the monitor
//! reports them as a diagnostic on the reporting rank, leaves its state
//! unchanged and hands the same value back to the caller.
//!
//! # Example
//!
//! ```rust
//! use cronometri::{Monitor, MonitorConfig, MonitorError};
//!
//! let monitor = Monitor::initialize(MonitorConfig::default().with_threads(1));
//! let err = monitor.stop("never-declared", 0.0, 1).unwrap_err();
//! assert!(matches!(err, MonitorError::UnknownLabel(_)));
//! ```

use std::collections::TryReserveError;
use thiserror::Error;

/// Unified error type for all monitor operations.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The label passed to an operation was empty.
    #[error("label is blank, call ignored")]
    EmptyLabel,

    /// A section with this label was already declared.
    #[error("section [{0}] has been registered already")]
    DuplicateLabel(String),

    /// No section with this label exists.
    #[error("label [{0}] is undefined, this may lead to incorrect measurement")]
    UnknownLabel(String),

    /// `stop()` was called on a section that is not running on this thread.
    #[error("section [{0}] is not running, stop ignored")]
    NotRunning(String),

    /// `start()` was called on a section that was already running on this
    /// thread. The clock has been restarted.
    #[error("section [{0}] was already running, its clock has been restarted")]
    AlreadyRunning(String),

    /// The hardware counter mode name is not recognized.
    #[error("unknown HWPC mode [{0}], user declared values will be reported")]
    UnknownHwpcMode(String),

    /// Error writing a report to its sink.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from the JSON exporter.
    #[cfg(feature = "json")]
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error from the Prometheus exporter.
    #[cfg(feature = "prometheus")]
    #[error("prometheus error: {0}")]
    Prometheus(String),

    /// Error encoding to UTF-8.
    #[error("utf8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

#[cfg(feature = "prometheus")]
impl From<prometheus::Error> for MonitorError {
    fn from(err: prometheus::Error) -> Self {
        MonitorError::Prometheus(err.to_string())
    }
}

/// Result type for monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Terminates the process after a failed allocation.
///
/// A registry that silently lost sections, or an order buffer that is
/// shorter than the registry, would produce a corrupted report.
pub(crate) fn resource_exhausted(what: &str, err: TryReserveError) -> ! {
    log::error!("cannot allocate {what}: {err}. terminating");
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            MonitorError::EmptyLabel.to_string(),
            "label is blank, call ignored"
        );
        assert!(MonitorError::DuplicateLabel("solver".into())
            .to_string()
            .contains("[solver]"));
        assert!(MonitorError::UnknownHwpcMode("TURBO".into())
            .to_string()
            .contains("TURBO"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed");
        let err: MonitorError = io.into();
        assert!(matches!(err, MonitorError::Io(_)));
    }
}
