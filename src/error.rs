//! # Error Handling
//!
//! Error types shared by the frame codec, the channel layer and the client session.
//!
//! ## Error Categories
//!
//! ### Transport Errors
//! - **I/O Errors**: socket read/write failures
//! - **Connection Errors**: connect failures, or the channel going away while a
//!   request is pending
//! - **Timeout Errors**: no response arrived within the configured window
//!
//! ### Protocol Errors
//! - **Protocol Errors**: the server answered with a Modbus exception frame, or the
//!   channel delivered a payload that was not hex text
//! - **Frame Errors**: hex response text that cannot be parsed by the strict parser
//!
//! ### Data Errors
//! - **Invalid Data**: request validation failures
//! - **Configuration Errors**: malformed addresses or configuration files
//!
//! ## Usage
//!
//! ```rust
//! use mbap_master::{ModbusError, ModbusResult};
//!
//! fn handle(result: ModbusResult<Vec<i32>>) {
//!     match result {
//!         Ok(values) => println!("Read {} registers", values.len()),
//!         Err(ModbusError::Timeout { operation, timeout_ms }) => {
//!             println!("Timeout during {}: {}ms", operation, timeout_ms);
//!         }
//!         Err(error) if error.is_protocol_error() => {
//!             println!("Channel closed after protocol error: {}", error);
//!         }
//!         Err(error) => println!("Other error: {}", error),
//!     }
//! }
//! ```

use thiserror::Error;

/// Result type alias for Modbus operations
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Modbus error types
///
/// Each variant carries enough context to log the failure without access to the
/// request that caused it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModbusError {
    /// I/O related errors
    ///
    /// Low-level socket failures while writing a request frame or reading a
    /// response.
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Connection errors
    ///
    /// # Examples
    /// - Connection refused by remote host
    /// - Channel closed while a response was pending
    /// - Channel reported an error while a response was pending
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Timeout errors
    ///
    /// Raised when the response window configured on the client expires. The
    /// pending wait is released and the session moves to `Failed`.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Protocol-level errors
    ///
    /// Always terminal for the channel: the client closes the connection before
    /// returning this error.
    ///
    /// # Examples
    /// - `non-string response`: the channel delivered raw bytes instead of hex text
    /// - `invalid request`: the server answered with an exception frame
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Frame parsing errors
    ///
    /// Produced by the strict response parser only; the session itself decodes
    /// leniently.
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// Invalid data value
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl ModbusError {
    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io { message: message.into() }
    }

    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection { message: message.into() }
    }

    /// Create a new timeout error
    ///
    /// # Arguments
    ///
    /// * `operation` - Description of the operation that timed out
    /// * `timeout_ms` - Timeout duration in milliseconds
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a new protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol { message: message.into() }
    }

    /// Create a frame error
    pub fn frame<S: Into<String>>(message: S) -> Self {
        Self::Frame { message: message.into() }
    }

    /// Create an invalid data error
    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        Self::InvalidData { message: message.into() }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Check if the error is recoverable (can retry)
    ///
    /// Recovery from a transport error means reconnecting: the client never
    /// reconnects on its own.
    ///
    /// ```rust
    /// use mbap_master::ModbusError;
    ///
    /// assert!(ModbusError::timeout("read response", 5000).is_recoverable());
    /// assert!(!ModbusError::protocol("invalid request").is_recoverable());
    /// ```
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::Connection { .. } | Self::Timeout { .. }
        )
    }

    /// Check if the error is a network/transport issue
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::Connection { .. } | Self::Timeout { .. }
        )
    }

    /// Check if the error is a protocol issue
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Protocol { .. } | Self::Frame { .. })
    }
}

/// Convert from std::io::Error
impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

/// Convert from serde JSON errors
impl From<serde_json::Error> for ModbusError {
    fn from(err: serde_json::Error) -> Self {
        Self::configuration(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let err = ModbusError::timeout("read response", 5000);
        assert!(err.is_recoverable());
        assert!(err.is_transport_error());
        assert!(!err.is_protocol_error());

        let err = ModbusError::protocol("invalid request");
        assert!(!err.is_recoverable());
        assert!(err.is_protocol_error());

        let err = ModbusError::frame("odd hex length");
        assert!(err.is_protocol_error());
        assert!(!err.is_transport_error());
    }

    #[test]
    fn test_error_display() {
        let err = ModbusError::timeout("read response", 250);
        assert_eq!(err.to_string(), "Timeout after 250ms: read response");

        let err = ModbusError::protocol("non-string response");
        assert_eq!(err.to_string(), "Protocol error: non-string response");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: ModbusError = io.into();
        assert!(matches!(err, ModbusError::Io { ref message } if message.contains("pipe closed")));
    }

    #[test]
    fn test_json_conversion() {
        let err: ModbusError = serde_json::from_str::<u32>("not json").unwrap_err().into();
        assert!(matches!(err, ModbusError::Configuration { .. }));
    }
}
