//! Error types for record encryption and key handling.

use thiserror::Error;

/// Errors raised while deriving keys or sealing/opening records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Key material has a length AES does not support
    #[error("invalid key length {actual}: expected 16, 24 or 32 bytes")]
    InvalidKeyLength {
        /// Length of the rejected key material
        actual: usize,
    },

    /// Encrypted record is shorter than nonce + one byte + CRC
    #[error("record too short: {actual} bytes, need at least {min}")]
    RecordTooShort {
        /// Length of the rejected record
        actual: usize,
        /// Minimum length the decoder accepts
        min: usize,
    },

    /// CRC mismatch after decryption (wrong key, corruption or garbage)
    #[error("record failed its CRC check after decryption")]
    BadRecordCrc,
}
