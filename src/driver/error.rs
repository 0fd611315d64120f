//! Error types for the serial port engine
//!
//! Errors are organized by domain for better diagnostics:
//! - [`ConfigError`]: Rejected configuration and line parameters
//! - [`QueueError`]: Request submission failures
//! - [`IoError`]: Runtime failures
//!
//! The unified [`Error`] enum wraps all domain errors and is returned
//! by most engine methods.
//!
//! Note that these are *submission* failures: a request that was accepted
//! never errors through this type, it terminates with a
//! [`CompletionStatus`](crate::driver::request::CompletionStatus).

// =============================================================================
// Configuration Errors
// =============================================================================

/// Rejected configuration and line parameters
///
/// These fail the operation synchronously and leave the port state
/// untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Port already initialized
    AlreadyInitialized,
    /// Baud rate does not produce a representable divisor
    InvalidBaud,
    /// Word length / stop bits / parity combination is not supported
    InvalidLineControl,
    /// Handshake settings are inconsistent or limits exceed the ring
    InvalidHandshake,
    /// Special characters collide with the escape character
    InvalidCharacters,
    /// Operation is invalid in the current port state
    InvalidState,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ConfigError {
    /// Returns a human-readable description of the error
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ConfigError::AlreadyInitialized => "already initialized",
            ConfigError::InvalidBaud => "invalid baud rate",
            ConfigError::InvalidLineControl => "invalid line control",
            ConfigError::InvalidHandshake => "invalid handshake settings",
            ConfigError::InvalidCharacters => "invalid special characters",
            ConfigError::InvalidState => "invalid state for operation",
        }
    }
}

// =============================================================================
// Queue Errors
// =============================================================================

/// Request submission failures
///
/// These occur before a request is accepted onto its queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum QueueError {
    /// A wait is already pending on this port
    WaitAlreadyPending,
    /// No wait mask is set, so a wait cannot be armed
    NoWaitMask,
    /// An immediate character is already pending
    ImmediatePending,
    /// The request refers to a request id that is not queued
    UnknownRequest,
    /// Zero-length or otherwise malformed request payload
    InvalidLength,
}

impl core::fmt::Display for QueueError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl QueueError {
    /// Returns a human-readable description of the error
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            QueueError::WaitAlreadyPending => "wait already pending",
            QueueError::NoWaitMask => "no wait mask set",
            QueueError::ImmediatePending => "immediate char already pending",
            QueueError::UnknownRequest => "unknown request id",
            QueueError::InvalidLength => "invalid request length",
        }
    }
}

// =============================================================================
// I/O Errors
// =============================================================================

/// Runtime failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IoError {
    /// The hardware has vanished; only re-opening can recover the port
    DeviceGone,
    /// Allocation failed (ring resize or request buffer)
    OutOfMemory,
}

impl core::fmt::Display for IoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl IoError {
    /// Returns a human-readable description of the error
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            IoError::DeviceGone => "device gone",
            IoError::OutOfMemory => "out of memory",
        }
    }
}

// =============================================================================
// Unified Error Type
// =============================================================================

/// This enum wraps all domain-specific errors for unified error handling.
///
/// Match on the inner domain error for specific handling:
/// ```ignore
/// match result {
///     Err(Error::Config(ConfigError::InvalidBaud)) => { /* ... */ }
///     Err(Error::Queue(QueueError::WaitAlreadyPending)) => { /* ... */ }
///     Err(Error::Io(IoError::OutOfMemory)) => { /* ... */ }
///     _ => {}
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Configuration error
    Config(ConfigError),
    /// Request queue error
    Queue(QueueError),
    /// I/O error
    Io(IoError),
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Config(e) => write!(f, "config: {}", e.as_str()),
            Error::Queue(e) => write!(f, "queue: {}", e.as_str()),
            Error::Io(e) => write!(f, "io: {}", e.as_str()),
        }
    }
}

// From impls for automatic conversion
impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<QueueError> for Error {
    fn from(e: QueueError) -> Self {
        Error::Queue(e)
    }
}

impl From<IoError> for Error {
    fn from(e: IoError) -> Self {
        Error::Io(e)
    }
}

/// Result type alias for port operations
pub type Result<T> = core::result::Result<T, Error>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = core::result::Result<T, ConfigError>;

/// Result type alias for queue operations
pub type QueueResult<T> = core::result::Result<T, QueueError>;

/// Result type alias for I/O operations
pub type IoResult<T> = core::result::Result<T, IoError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    extern crate std;
    use std::format;

    use super::*;

    #[test]
    fn config_error_as_str_non_empty() {
        let variants = [
            ConfigError::AlreadyInitialized,
            ConfigError::InvalidBaud,
            ConfigError::InvalidLineControl,
            ConfigError::InvalidHandshake,
            ConfigError::InvalidCharacters,
            ConfigError::InvalidState,
        ];

        for variant in variants {
            assert!(!variant.as_str().is_empty(), "{variant:?} has empty string");
        }
    }

    #[test]
    fn queue_error_as_str_non_empty() {
        let variants = [
            QueueError::WaitAlreadyPending,
            QueueError::NoWaitMask,
            QueueError::ImmediatePending,
            QueueError::UnknownRequest,
            QueueError::InvalidLength,
        ];

        for variant in variants {
            assert!(!variant.as_str().is_empty(), "{variant:?} has empty string");
        }
    }

    #[test]
    fn io_error_display() {
        assert_eq!(format!("{}", IoError::OutOfMemory), "out of memory");
        assert_eq!(format!("{}", IoError::DeviceGone), "device gone");
    }

    #[test]
    fn error_from_config_error() {
        let err: Error = ConfigError::InvalidBaud.into();
        match err {
            Error::Config(e) => assert_eq!(e, ConfigError::InvalidBaud),
            _ => panic!("Expected Error::Config"),
        }
    }

    #[test]
    fn error_from_queue_error() {
        let err: Error = QueueError::NoWaitMask.into();
        match err {
            Error::Queue(e) => assert_eq!(e, QueueError::NoWaitMask),
            _ => panic!("Expected Error::Queue"),
        }
    }

    #[test]
    fn error_from_io_error() {
        let err: Error = IoError::DeviceGone.into();
        match err {
            Error::Io(e) => assert_eq!(e, IoError::DeviceGone),
            _ => panic!("Expected Error::Io"),
        }
    }

    #[test]
    fn error_display_includes_domain() {
        let display = format!("{}", Error::Config(ConfigError::InvalidHandshake));
        assert!(display.contains("config"));
        assert!(display.contains("handshake"));

        let display = format!("{}", Error::Queue(QueueError::ImmediatePending));
        assert!(display.contains("queue"));

        let display = format!("{}", Error::Io(IoError::OutOfMemory));
        assert!(display.contains("io"));
    }

    #[test]
    fn error_equality() {
        assert_eq!(
            Error::Config(ConfigError::InvalidBaud),
            Error::Config(ConfigError::InvalidBaud)
        );
        assert_ne!(
            Error::Config(ConfigError::InvalidBaud),
            Error::Config(ConfigError::InvalidState)
        );
    }

    #[test]
    fn result_type_works() {
        fn test_fn() -> Result<u32> {
            Ok(42)
        }
        assert_eq!(test_fn().unwrap(), 42);
    }

    #[test]
    fn domain_result_aliases_work() {
        fn config() -> ConfigResult<()> {
            Err(ConfigError::InvalidBaud)
        }
        fn queue() -> QueueResult<()> {
            Err(QueueError::NoWaitMask)
        }
        fn io() -> IoResult<()> {
            Err(IoError::OutOfMemory)
        }

        assert!(config().is_err());
        assert!(queue().is_err());
        assert!(io().is_err());
    }
}
