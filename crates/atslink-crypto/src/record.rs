//! AES-CTR record sealing and opening.
//!
//! A record on the wire is `nonce(8) ‖ AES-CTR(key, IV, plaintext ‖
//! crc16)`. The IV is `nonce ‖ serial(6) ‖ 0x0000` and the counter is the
//! whole 16-byte block, incremented big-endian with wraparound — which is
//! exactly `Ctr128BE`. The CRC tail is the only integrity check the
//! protocol has, so a failed CRC after decryption means wrong key,
//! corruption, or bytes that were never a record.

use aes::{Aes128, Aes192, Aes256};
use atslink_proto::crc::{append_crc, strip_crc};
use ctr::Ctr128BE;
use ctr::cipher::{KeyIvInit, StreamCipher};

use crate::error::CryptoError;
use crate::keys::RecordKey;

/// Length of the random nonce prefixed to every record.
pub const NONCE_LEN: usize = 8;

/// Length of the serial slice folded into the IV.
pub const SERIAL_LEN: usize = 6;

/// Smallest record the decoder accepts: nonce + one payload byte + CRC.
pub const MIN_RECORD_LEN: usize = NONCE_LEN + 1 + 2;

fn build_iv(nonce: &[u8; NONCE_LEN], serial: &[u8; SERIAL_LEN]) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[..NONCE_LEN].copy_from_slice(nonce);
    iv[NONCE_LEN..NONCE_LEN + SERIAL_LEN].copy_from_slice(serial);
    iv
}

/// Apply the AES-CTR keystream in place. Involution: applying twice with
/// the same key, nonce and serial restores the input.
pub fn apply_ctr(
    data: &mut [u8],
    key: &RecordKey,
    nonce: &[u8; NONCE_LEN],
    serial: &[u8; SERIAL_LEN],
) {
    let iv = build_iv(nonce, serial);
    match key {
        RecordKey::Aes128(k) => {
            Ctr128BE::<Aes128>::new(&(*k).into(), &iv.into()).apply_keystream(data);
        },
        RecordKey::Aes192(k) => {
            Ctr128BE::<Aes192>::new(&(*k).into(), &iv.into()).apply_keystream(data);
        },
        RecordKey::Aes256(k) => {
            Ctr128BE::<Aes256>::new(&(*k).into(), &iv.into()).apply_keystream(data);
        },
    }
}

/// Seal a plaintext message into a record.
///
/// The caller supplies the 8 random nonce bytes, which keeps this
/// function deterministic for tests; production callers draw them fresh
/// per frame.
#[must_use]
pub fn encrypt_record(
    payload: &[u8],
    key: &RecordKey,
    serial: &[u8; SERIAL_LEN],
    nonce: [u8; NONCE_LEN],
) -> Vec<u8> {
    let mut data = append_crc(payload);
    apply_ctr(&mut data, key, &nonce, serial);

    let mut out = Vec::with_capacity(NONCE_LEN + data.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&data);
    out
}

/// Open a record: split the nonce, decrypt, verify and strip the CRC.
///
/// # Errors
///
/// - `CryptoError::RecordTooShort` below [`MIN_RECORD_LEN`]
/// - `CryptoError::BadRecordCrc` when the decrypted tail does not verify
pub fn decrypt_record(
    record: &[u8],
    key: &RecordKey,
    serial: &[u8; SERIAL_LEN],
) -> Result<Vec<u8>, CryptoError> {
    if record.len() < MIN_RECORD_LEN {
        return Err(CryptoError::RecordTooShort { actual: record.len(), min: MIN_RECORD_LEN });
    }

    let Some((nonce, ciphertext)) = record.split_first_chunk::<NONCE_LEN>() else {
        return Err(CryptoError::RecordTooShort { actual: record.len(), min: MIN_RECORD_LEN });
    };

    let mut data = ciphertext.to_vec();
    apply_ctr(&mut data, key, nonce, serial);

    let payload = strip_crc(&data).map_err(|_| CryptoError::BadRecordCrc)?;
    Ok(payload.to_vec())
}
