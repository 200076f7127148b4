//! Panel serial number decoding.
//!
//! The device-info reply carries the serial as 16 base64 characters that
//! decode to 12 bytes; the 6-byte hardware serial is the XOR of the two
//! halves. The panel's alphabet is standard base64 with `-` accepted as an
//! alias for `+` and `_` for `/`.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::errors::{ProtocolError, Result};

/// Length of the decoded hardware serial.
pub const SERIAL_LEN: usize = 6;

fn is_serial_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '-')
}

/// Whether `text` is shaped like a wire serial (16 chars of the panel's
/// base64 alphabet).
#[must_use]
pub fn looks_like_serial(text: &str) -> bool {
    text.len() == 16 && text.chars().all(is_serial_char)
}

/// Decode the 16-character base64 serial to its 6 hardware bytes.
///
/// # Errors
///
/// - `ProtocolError::InvalidSerial` if the text is not 16 characters of
///   the panel alphabet or does not base64-decode to 12 bytes
pub fn decode_serial(text: &str) -> Result<[u8; SERIAL_LEN]> {
    if !looks_like_serial(text) {
        return Err(ProtocolError::InvalidSerial { serial: text.to_string() });
    }

    let normalized: String = text
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();

    let decoded = STANDARD
        .decode(normalized.as_bytes())
        .map_err(|_| ProtocolError::InvalidSerial { serial: text.to_string() })?;

    if decoded.len() != 2 * SERIAL_LEN {
        return Err(ProtocolError::InvalidSerial { serial: text.to_string() });
    }

    let mut serial = [0u8; SERIAL_LEN];
    for (i, b) in serial.iter_mut().enumerate() {
        *b = decoded[i] ^ decoded[i + SERIAL_LEN];
    }
    Ok(serial)
}
