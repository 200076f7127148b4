//! Batch container encoding and response splitting.
//!
//! A batch packs several fixed-length embedded requests into one round
//! trip: `batch-id ‖ lenByte ‖ emb1 ‖ sep ‖ emb2 ‖ …` where every
//! embedded request has its 0xC0 header stripped and `sep == lenByte`.
//! The response interleaves fixed-length embedded responses with a
//! separator equal to the type indicator byte.

use crate::errors::{ProtocolError, Result};
use crate::messages::{
    BATCH, BATCH_RESPONSE_ID, EntityKind, GET_STATUS, GET_ZONES_ASSIGNED, RESPONSE_OK,
    STATUS_OBJECT_ID_OFFSET, ZONES_ASSIGNED_RESPONSE_LEN,
};

/// Build a batch request from fully constructed inner requests.
///
/// Every inner request must still carry its header byte (as produced by
/// [`crate::template::Template::construct`]); the builder strips it.
/// `body_len` is the shared embedded body length (6 for status queries,
/// 12 for zones-assigned queries).
///
/// # Errors
///
/// - `ProtocolError::MalformedBatch` when an inner request does not have
///   the declared body length
pub fn build_batch(inner: &[Vec<u8>], body_len: usize) -> Result<Vec<u8>> {
    let mut out = BATCH.construct(&[])?;
    out.push(body_len as u8);

    for (i, req) in inner.iter().enumerate() {
        let body = req.get(1..).ok_or_else(|| ProtocolError::MalformedBatch {
            reason: "embedded request is empty".to_string(),
        })?;
        if body.len() != body_len {
            return Err(ProtocolError::MalformedBatch {
                reason: format!("embedded request has length {}, declared {body_len}", body.len()),
            });
        }
        if i > 0 {
            out.push(body_len as u8);
        }
        out.extend_from_slice(body);
    }
    Ok(out)
}

fn embedded_response_len(payload: &[u8]) -> Option<usize> {
    if GET_ZONES_ASSIGNED.matches(payload, 0) {
        return Some(ZONES_ASSIGNED_RESPONSE_LEN);
    }
    if payload.first() == GET_STATUS.msg_id.first() {
        return EntityKind::from_tag(*payload.get(1)?).map(EntityKind::status_response_len);
    }
    None
}

/// Split a decrypted batch response into its embedded payloads.
///
/// `plaintext` is the whole decrypted message including the header byte.
/// A non-batch response is passed through as a one-element list (header
/// stripped), so callers can treat both shapes uniformly. Iteration stops
/// at the end of the buffer or at the first missing separator.
///
/// # Errors
///
/// - `ProtocolError::FrameTruncated` when the input is shorter than a header
/// - `ProtocolError::MalformedBatch` on an unknown embedded type or a
///   truncated embedded response
pub fn split_batch(plaintext: &[u8]) -> Result<Vec<Vec<u8>>> {
    if plaintext.is_empty() {
        return Err(ProtocolError::FrameTruncated { expected: 1, actual: 0 });
    }

    let is_batch = plaintext[0] == RESPONSE_OK && plaintext.get(1..3) == Some(BATCH_RESPONSE_ID);
    if !is_batch {
        return Ok(vec![plaintext[1..].to_vec()]);
    }

    let type_indicator = *plaintext.get(3).ok_or(ProtocolError::FrameTruncated {
        expected: 4,
        actual: plaintext.len(),
    })?;

    let mut out = Vec::new();
    let mut pos = 4;
    while pos < plaintext.len() {
        let len = embedded_response_len(&plaintext[pos..]).ok_or_else(|| {
            ProtocolError::MalformedBatch {
                reason: format!("unknown embedded response at offset {pos}"),
            }
        })?;
        let end = pos + len;
        let Some(embedded) = plaintext.get(pos..end) else {
            return Err(ProtocolError::MalformedBatch {
                reason: format!("embedded response truncated at offset {pos}"),
            });
        };
        out.push(embedded.to_vec());
        pos = end;

        // Separator between embedded responses equals the type indicator
        match plaintext.get(pos) {
            Some(&sep) if sep == type_indicator => pos += 1,
            _ => break,
        }
    }
    Ok(out)
}

/// Entity id of a status response payload (byte at offset 3).
#[must_use]
pub fn status_object_id(payload: &[u8]) -> Option<u16> {
    payload.get(STATUS_OBJECT_ID_OFFSET).map(|&b| u16::from(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::Value;

    #[test]
    fn splits_two_zone_statuses() {
        // Scenario S7 from the protocol contract
        let plaintext = [
            0xA0, 0xEE, 0xEE, 0x07, 0x31, 0x01, 0x00, 0x05, 0x04, 0x00, 0x00, 0x07, 0x31, 0x01,
            0x00, 0x06, 0x00, 0x00, 0x00,
        ];
        let parts = split_batch(&plaintext).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(status_object_id(&parts[0]), Some(5));
        assert_eq!(status_object_id(&parts[1]), Some(6));
        assert_eq!(parts[0].len(), EntityKind::Zone.status_response_len());
    }

    #[test]
    fn single_response_falls_back_to_one_element() {
        let plaintext = [0xA0, 0x31, 0x01, 0x00, 0x09, 0x00, 0x00, 0x00];
        let parts = split_batch(&plaintext).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(status_object_id(&parts[0]), Some(9));
    }

    #[test]
    fn missing_separator_terminates() {
        // Second embedded present but separator byte is wrong
        let plaintext = [
            0xA0, 0xEE, 0xEE, 0x07, 0x31, 0x01, 0x00, 0x05, 0x04, 0x00, 0x00, 0x99, 0x31, 0x01,
            0x00, 0x06, 0x00, 0x00, 0x00,
        ];
        let parts = split_batch(&plaintext).unwrap();
        assert_eq!(parts.len(), 1);
    }

    #[test]
    fn truncated_embedded_is_an_error() {
        let plaintext = [0xA0, 0xEE, 0xEE, 0x07, 0x31, 0x01, 0x00];
        assert!(matches!(
            split_batch(&plaintext),
            Err(ProtocolError::MalformedBatch { .. })
        ));
    }

    #[test]
    fn build_strips_headers_and_interleaves_separators() {
        let one = GET_STATUS
            .construct(&[("kind", Value::Int(0x01)), ("id", Value::Int(5))])
            .unwrap();
        let two = GET_STATUS
            .construct(&[("kind", Value::Int(0x01)), ("id", Value::Int(6))])
            .unwrap();

        let batch = build_batch(&[one.clone(), two.clone()], 6).unwrap();

        // header + 4-byte batch id + len byte
        assert_eq!(&batch[..6], &[0xC0, 0xEE, 0xE0, 0xEE, 0xEE, 0x06]);
        assert_eq!(&batch[6..12], &one[1..]);
        assert_eq!(batch[12], 0x06);
        assert_eq!(&batch[13..19], &two[1..]);
    }

    #[test]
    fn build_rejects_wrong_length() {
        let short = vec![0xC0, 0x31, 0x01];
        assert!(matches!(
            build_batch(&[short], 6),
            Err(ProtocolError::MalformedBatch { .. })
        ));
    }
}
