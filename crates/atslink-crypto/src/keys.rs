//! Key material and the password-to-key derivation.
//!
//! The panel derives its pre-session "initial key" from the user's
//! 24/36/48-character password: every 12 characters collapse into 8 key
//! bytes through a Gray-code pack. The in-session key is 16 bytes, half
//! chosen by the client and half by the panel during the handshake.

use zeroize::Zeroize;

use crate::error::CryptoError;

/// Characters consumed per 8 derived key bytes.
const PASSWORD_BLOCK: usize = 12;

/// Most blocks a password contributes (48 chars, AES-256).
const MAX_BLOCKS: usize = 4;

/// An AES key of one of the three supported sizes.
///
/// The variant selects the cipher: 16 bytes run AES-128, 24 AES-192,
/// 32 AES-256. Key bytes are wiped on drop.
#[derive(Clone, PartialEq, Eq)]
pub enum RecordKey {
    /// 16-byte key, AES-128
    Aes128([u8; 16]),
    /// 24-byte key, AES-192
    Aes192([u8; 24]),
    /// 32-byte key, AES-256
    Aes256([u8; 32]),
}

impl RecordKey {
    /// Wrap raw key material of a supported length.
    ///
    /// # Errors
    ///
    /// - `CryptoError::InvalidKeyLength` for anything but 16/24/32 bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        match bytes.len() {
            16 => {
                let mut k = [0u8; 16];
                k.copy_from_slice(bytes);
                Ok(Self::Aes128(k))
            },
            24 => {
                let mut k = [0u8; 24];
                k.copy_from_slice(bytes);
                Ok(Self::Aes192(k))
            },
            32 => {
                let mut k = [0u8; 32];
                k.copy_from_slice(bytes);
                Ok(Self::Aes256(k))
            },
            actual => Err(CryptoError::InvalidKeyLength { actual }),
        }
    }

    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Aes128(k) => k,
            Self::Aes192(k) => k,
            Self::Aes256(k) => k,
        }
    }
}

impl Drop for RecordKey {
    fn drop(&mut self) {
        match self {
            Self::Aes128(k) => k.zeroize(),
            Self::Aes192(k) => k.zeroize(),
            Self::Aes256(k) => k.zeroize(),
        }
    }
}

// Key bytes must never end up in logs
impl std::fmt::Debug for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cipher = match self {
            Self::Aes128(_) => "aes-128",
            Self::Aes192(_) => "aes-192",
            Self::Aes256(_) => "aes-256",
        };
        write!(f, "RecordKey({cipher}, redacted)")
    }
}

fn gray_pack(v: u16) -> u8 {
    let g = v ^ (v >> 1);
    (((g & 0x600) >> 3) | ((g & 0xC0) >> 2) | ((g & 0x18) >> 1) | (g & 3)) as u8
}

fn hi(a: u8, b: u8) -> u16 {
    (u16::from(a) << 4) | (u16::from(b) >> 4)
}

fn lo(b: u8, c: u8) -> u16 {
    (u16::from(b & 0x0F) << 8) | u16::from(c)
}

/// Derive the initial key from the user's password.
///
/// Passwords shorter than 24 characters cannot carry enough entropy for
/// the scheme; they fall back to the 16-zero-byte key the panel uses for
/// unconfigured links. Otherwise the first `min(len / 12, 4)` blocks of
/// 12 characters each yield 8 key bytes, giving 16, 24 or 32 bytes for
/// 24-, 36- and 48-character passwords.
#[must_use]
pub fn derive_initial_key(password: &str) -> RecordKey {
    let chars = password.as_bytes();
    if chars.len() < 2 * PASSWORD_BLOCK {
        return RecordKey::Aes128([0u8; 16]);
    }

    let blocks = (chars.len() / PASSWORD_BLOCK).min(MAX_BLOCKS);
    let mut bytes = Vec::with_capacity(blocks * 8);

    for block in chars.chunks_exact(PASSWORD_BLOCK).take(blocks) {
        bytes.push(gray_pack(hi(block[0], block[1])));
        bytes.push(gray_pack(lo(block[1], block[2])));
        bytes.push(gray_pack(hi(block[3], block[4])));
        bytes.push(gray_pack(lo(block[4], block[5])));
        bytes.push(gray_pack(hi(block[6], block[7])));
        bytes.push(gray_pack(lo(block[7], block[8])));
        bytes.push(gray_pack(hi(block[9], block[10])));
        bytes.push(gray_pack(lo(block[10], block[11])));
    }

    let key = match RecordKey::from_bytes(&bytes) {
        Ok(key) => key,
        // blocks is 2..=4, so the length is always 16, 24 or 32
        Err(_) => RecordKey::Aes128([0u8; 16]),
    };
    bytes.zeroize();
    key
}

/// Combine the client and panel halves into the 16-byte session key.
#[must_use]
pub fn session_key(client: &[u8; 8], panel: &[u8; 8]) -> RecordKey {
    let mut k = [0u8; 16];
    k[..8].copy_from_slice(client);
    k[8..].copy_from_slice(panel);
    RecordKey::Aes128(k)
}
