//! Error types for wire-level codecs and the template engine.

use thiserror::Error;

/// Result alias used throughout the proto crate.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised by framing, codecs and the message template engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame is shorter than the minimum the decoder needs
    #[error("frame truncated: expected at least {expected} bytes, got {actual}")]
    FrameTruncated {
        /// Minimum length required
        expected: usize,
        /// Length actually available
        actual: usize,
    },

    /// CRC-16 tail check failed
    #[error("invalid CRC: computed {computed:#06x}, frame carries {stored:#06x}")]
    InvalidCrc {
        /// CRC computed over the frame body
        computed: u16,
        /// CRC stored in the frame tail
        stored: u16,
    },

    /// A field name was used that the template does not define
    #[error("template {template:?} has no field {field:?}")]
    UnknownField {
        /// Template name
        template: &'static str,
        /// Field name that was looked up
        field: String,
    },

    /// A field write or read fell outside the message buffer
    #[error("field {field:?} of template {template:?} is out of range at offset {offset}")]
    FieldOutOfRange {
        /// Template name
        template: &'static str,
        /// Field name
        field: &'static str,
        /// Offending byte offset
        offset: usize,
    },

    /// The provided value does not fit the field definition
    #[error("value for field {field:?} of template {template:?} is invalid: {reason}")]
    InvalidFieldValue {
        /// Template name
        template: &'static str,
        /// Field name
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },

    /// The serial string is not 16 base64 characters
    #[error("invalid serial {serial:?}")]
    InvalidSerial {
        /// The rejected serial string
        serial: String,
    },

    /// A batch response did not match the registered embedded layout
    #[error("malformed batch response: {reason}")]
    MalformedBatch {
        /// What the splitter choked on
        reason: String,
    },

    /// Response carries an unexpected message id for the requested parse
    #[error("unexpected message: expected {expected:?}, got id bytes {got:02x?}")]
    UnexpectedMessage {
        /// Template name expected
        expected: &'static str,
        /// Message id bytes actually seen
        got: Vec<u8>,
    },
}
