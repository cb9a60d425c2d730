//! Custom error types for the spectroradiometer core.
//!
//! This module defines the primary error type, `OspradError`, using the
//! `thiserror` crate. Every fallible operation in the crate returns the
//! crate-wide [`Result`] alias.
//!
//! ## Error Hierarchy
//!
//! - **`ConnectionFailed`**: no device found, or the handshake never produced a
//!   valid frame within the retry budget.
//! - **`Timeout`**: a command/response exchange (or a whole measurement)
//!   exceeded its deadline.
//! - **`InvalidConfiguration`**: a semantic constraint violation on
//!   [`Configuration`](crate::session::Configuration), caught before any
//!   device I/O. Never retried.
//! - **`CalibrationMissing`**: the connected unit has no entry in the loaded
//!   calibration store. Never retried; the measurement fails rather than
//!   returning uncorrected data.
//! - **`DegenerateSpectrum` / `OutOfRange`**: analytic preconditions of the
//!   color pipeline unmet. These carry no I/O cause and are reported
//!   distinctly so batch analysis can continue past one bad spectrum.
//! - **`DeviceFault`**: the device reported an error or kept producing
//!   malformed frames past the retry ceiling.
//!
//! Wrapped sources (`Io`, `Config`, `Csv`) convert via `#[from]` so the `?`
//! operator works throughout the crate.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type Result<T> = std::result::Result<T, OspradError>;

#[derive(Error, Debug)]
pub enum OspradError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Command timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("No calibration entry for unit #{0}")]
    CalibrationMissing(u32),

    #[error("Degenerate spectrum: tristimulus sum is zero or near-zero")]
    DegenerateSpectrum,

    #[error("Out of range: {0}")]
    OutOfRange(String),

    #[error("Device fault: {0}")]
    DeviceFault(String),

    #[error("Session not connected")]
    NotConnected,

    #[error("Malformed spectrum: {0}")]
    MalformedSpectrum(String),

    #[error("Configuration file error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Calibration file error: {0}")]
    Csv(#[from] csv::Error),
}

/// Discriminant of [`OspradError`], used for `last_error` reporting and for
/// matching on failure classes without the payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    ConnectionFailed,
    Timeout,
    InvalidConfiguration,
    CalibrationMissing,
    DegenerateSpectrum,
    OutOfRange,
    DeviceFault,
    NotConnected,
    MalformedSpectrum,
    Config,
    Io,
    Csv,
}

impl OspradError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OspradError::ConnectionFailed(_) => ErrorKind::ConnectionFailed,
            OspradError::Timeout(_) => ErrorKind::Timeout,
            OspradError::InvalidConfiguration(_) => ErrorKind::InvalidConfiguration,
            OspradError::CalibrationMissing(_) => ErrorKind::CalibrationMissing,
            OspradError::DegenerateSpectrum => ErrorKind::DegenerateSpectrum,
            OspradError::OutOfRange(_) => ErrorKind::OutOfRange,
            OspradError::DeviceFault(_) => ErrorKind::DeviceFault,
            OspradError::NotConnected => ErrorKind::NotConnected,
            OspradError::MalformedSpectrum(_) => ErrorKind::MalformedSpectrum,
            OspradError::Config(_) => ErrorKind::Config,
            OspradError::Io(_) => ErrorKind::Io,
            OspradError::Csv(_) => ErrorKind::Csv,
        }
    }
}

/// Snapshot of the most recent session failure, kept until the next
/// successful operation clears it.
#[derive(Clone, Debug)]
pub struct LastError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&OspradError> for LastError {
    fn from(err: &OspradError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OspradError::CalibrationMissing(42);
        assert_eq!(err.to_string(), "No calibration entry for unit #42");
    }

    #[test]
    fn test_last_error_snapshot() {
        let err = OspradError::DeviceFault("saturated".to_string());
        let last = LastError::from(&err);
        assert_eq!(last.kind, ErrorKind::DeviceFault);
        assert!(last.message.contains("saturated"));
    }

    #[test]
    fn test_kind_discriminants() {
        let timeout = OspradError::Timeout(std::time::Duration::from_millis(250));
        assert_eq!(timeout.kind(), ErrorKind::Timeout);
        assert_eq!(
            OspradError::DegenerateSpectrum.kind(),
            ErrorKind::DegenerateSpectrum
        );
    }
}
