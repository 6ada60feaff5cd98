//! Error types for the harness.

use thiserror::Error;

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Errors that can occur while standing up or tearing down an instance.
///
/// Probe transport failures never show up here: they only mean "not ready
/// yet". Cleanup problems are reported through
/// [`CleanupReport`](crate::cleanup::CleanupReport) instead.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Configuration error.
    ///
    /// Missing or invalid root directory, missing template, unwritable output
    /// location, invalid port range, or an override that conflicts with the
    /// shape a computed key must have.
    #[error("configuration error: {0}")]
    Config(String),

    /// No free port in the requested range.
    #[error("no available port in range {start}-{end} after {attempts} attempts")]
    NoAvailablePort {
        /// First port of the range.
        start: u16,
        /// Last port of the range (inclusive).
        end: u16,
        /// Number of ports probed.
        attempts: usize,
    },

    /// The service did not become ready.
    #[error("startup error: {0}")]
    Startup(String),

    /// The service kept answering after it was asked to stop.
    #[error("shutdown error: {0}")]
    Shutdown(String),

    /// A lifecycle operation was called out of order.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl HarnessError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new startup error.
    #[must_use]
    pub fn startup(msg: impl Into<String>) -> Self {
        Self::Startup(msg.into())
    }

    /// Creates a new shutdown error.
    #[must_use]
    pub fn shutdown(msg: impl Into<String>) -> Self {
        Self::Shutdown(msg.into())
    }

    /// Creates a new invalid state error.
    #[must_use]
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns true if no port could be allocated.
    #[must_use]
    pub const fn is_no_available_port(&self) -> bool {
        matches!(self, Self::NoAvailablePort { .. })
    }

    /// Returns true if this is a startup error.
    #[must_use]
    pub const fn is_startup(&self) -> bool {
        matches!(self, Self::Startup(_))
    }

    /// Returns true if this is a shutdown error.
    #[must_use]
    pub const fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown(_))
    }

    /// Returns true if this is an invalid state error.
    #[must_use]
    pub const fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState(_))
    }
}
