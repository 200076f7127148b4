//! Fuzz target for record opening.
//!
//! Garbage records must be rejected by length or CRC checks, never by a
//! panic; a CRC collision is fine, memory unsafety is not.

#![no_main]

use atslink_crypto::{RecordKey, decrypt_record};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let key = RecordKey::Aes128([0x42; 16]);
    let serial = [1, 2, 3, 4, 5, 6];
    let _ = decrypt_record(data, &key, &serial);
});
