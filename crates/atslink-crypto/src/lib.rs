//! Record encryption and key derivation for the ACE 2 (v6) protocol.
//!
//! Two key classes exist on a link:
//!
//! - the **initial key**, derived from the user's 24/36/48-character
//!   password by a Gray-code pack; it protects the handshake only
//! - the **session key**, 16 bytes combined from 8 client-chosen and 8
//!   panel-chosen bytes; it protects everything after key exchange
//!
//! Records are AES-CTR encrypted with a fresh 8-byte nonce per frame and
//! an IV of `nonce ‖ serial ‖ 0x0000`. Integrity comes from the CRC-16
//! tail inside the ciphertext — there is no authentication tag, so a
//! decrypt with the wrong key is detected (with CRC confidence only) by
//! the tail check.
//!
//! All functions are pure; callers provide the nonce bytes, which keeps
//! the crate deterministic under test.

#![forbid(unsafe_code)]

mod error;
mod keys;
mod record;

pub use error::CryptoError;
pub use keys::{RecordKey, derive_initial_key, session_key};
pub use record::{
    MIN_RECORD_LEN, NONCE_LEN, SERIAL_LEN, apply_ctr, decrypt_record, encrypt_record,
};
