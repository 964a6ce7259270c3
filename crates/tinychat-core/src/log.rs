//! Log levels for diagnostic actions.

/// Severity attached to `Log` actions.
///
/// Protocol code never logs directly; the runtime maps these onto its logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// Informational message
    Info,
    /// Warning
    Warn,
    /// Error
    Error,
}
