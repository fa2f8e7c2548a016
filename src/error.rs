//! Error types for the BSB engine
//!
//! Most variants describe conditions the scheduler absorbs on its own (bus
//! noise, a stalled field). Only configuration errors are meant to abort
//! startup.

use thiserror::Error;

use crate::registry::FieldId;

/// Result type used throughout the crate.
pub type BsbResult<T> = Result<T, BsbError>;

/// Errors produced by the codec, the registry, and the polling engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BsbError {
    /// Telegram failed framing or checksum validation
    #[error("Invalid frame: {message}")]
    FrameInvalid { message: String },

    /// Payload width does not match the value type
    #[error("Payload length mismatch: expected {expected} bytes, got {actual}")]
    PayloadLengthMismatch { expected: usize, actual: usize },

    /// Value cannot be represented by the field or its wire type
    #[error("Value {value} out of range: {message}")]
    OutOfRange { value: f64, message: String },

    /// A field with this id is already registered
    #[error("Duplicate field id: 0x{field_id:08X}")]
    DuplicateFieldId { field_id: FieldId },

    /// The link cannot accept bytes right now
    #[error("Transport busy")]
    TransportBusy,

    /// Retry budget exhausted for a field
    #[error("Field 0x{field_id:08X} unreachable")]
    FieldUnreachable { field_id: FieldId },

    /// Write requested for a read-only field
    #[error("Field 0x{field_id:08X} is not writable")]
    FieldNotWritable { field_id: FieldId },

    /// No field with this id is registered
    #[error("Unknown field: 0x{field_id:08X}")]
    UnknownField { field_id: FieldId },

    /// Invalid engine or field configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// I/O failure in the runtime driver
    #[error("I/O error: {message}")]
    Io { message: String },
}

impl BsbError {
    /// Create a frame validation error
    pub fn frame_invalid<S: Into<String>>(message: S) -> Self {
        Self::FrameInvalid {
            message: message.into(),
        }
    }

    /// Create a payload length error
    pub fn payload_length(expected: usize, actual: usize) -> Self {
        Self::PayloadLengthMismatch { expected, actual }
    }

    /// Create a range error
    pub fn out_of_range<S: Into<String>>(value: f64, message: S) -> Self {
        Self::OutOfRange {
            value,
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Whether the engine keeps running after this error.
    ///
    /// Only configuration mistakes and driver I/O failures are fatal.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::Configuration { .. } | Self::DuplicateFieldId { .. } | Self::Io { .. }
        )
    }
}

impl From<std::io::Error> for BsbError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats_field_ids_as_hex() {
        let err = BsbError::DuplicateFieldId {
            field_id: 0x3D2D0215,
        };
        assert_eq!(err.to_string(), "Duplicate field id: 0x3D2D0215");

        let err = BsbError::payload_length(2, 3);
        assert_eq!(
            err.to_string(),
            "Payload length mismatch: expected 2 bytes, got 3"
        );
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(BsbError::TransportBusy.is_recoverable());
        assert!(BsbError::frame_invalid("crc").is_recoverable());
        assert!(BsbError::FieldUnreachable { field_id: 1 }.is_recoverable());
        assert!(!BsbError::configuration("divisor").is_recoverable());
        assert!(!BsbError::DuplicateFieldId { field_id: 1 }.is_recoverable());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let err: BsbError = io.into();
        assert!(matches!(err, BsbError::Io { .. }));
    }
}
