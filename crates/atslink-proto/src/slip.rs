//! SLIP framing (RFC 1055 style) as used on the panel's TCP link.
//!
//! A frame on the wire is `END <escaped bytes> END`. The panel reuses the
//! END marker (0xC0) as the request header byte, so the encoder escapes
//! every interior 0xC0 and 0xDB.

/// Frame delimiter. Also the request/unsolicited header byte.
pub const END: u8 = 0xC0;

/// Escape introducer.
pub const ESC: u8 = 0xDB;

/// Escaped substitute for an interior END byte.
pub const ESC_END: u8 = 0xDC;

/// Escaped substitute for an interior ESC byte.
pub const ESC_ESC: u8 = 0xDD;

/// SLIP-encode `data` into a delimited frame.
///
/// Output is `END ... END` with 0xC0 -> 0xDB 0xDC and 0xDB -> 0xDB 0xDD
/// applied to the interior bytes.
#[must_use]
pub fn encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 2);
    out.push(END);
    for &b in data {
        match b {
            END => out.extend_from_slice(&[ESC, ESC_END]),
            ESC => out.extend_from_slice(&[ESC, ESC_ESC]),
            _ => out.push(b),
        }
    }
    out.push(END);
    out
}

/// SLIP-decode one frame.
///
/// Decoding starts at the first END marker and stops at the next one;
/// leading garbage before the first marker is skipped. An unknown escape
/// sequence passes both bytes through unchanged (tolerant decoder), so
/// decode never fails — a frame with no closing marker simply yields
/// everything up to the end of input.
#[must_use]
pub fn decode(frame: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame.len());

    let Some(start) = frame.iter().position(|&b| b == END) else {
        return out;
    };

    let mut i = start + 1;
    while i < frame.len() {
        match frame[i] {
            END => break,
            ESC if i + 1 < frame.len() => {
                match frame[i + 1] {
                    ESC_END => out.push(END),
                    ESC_ESC => out.push(ESC),
                    other => {
                        out.push(ESC);
                        out.push(other);
                    },
                }
                i += 2;
                continue;
            },
            b => out.push(b),
        }
        i += 1;
    }

    out
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn encode_escapes_end_and_esc() {
        // Scenario: END and ESC inside the payload get escaped, 0x00 passes
        assert_eq!(encode(&[0xC0, 0xDB, 0x00]), vec![
            0xC0, 0xDB, 0xDC, 0xDB, 0xDD, 0x00, 0xC0
        ]);
    }

    #[test]
    fn decode_skips_leading_garbage() {
        let decoded = decode(&[0x55, 0xAA, 0xC0, 0x01, 0x02, 0xC0]);
        assert_eq!(decoded, vec![0x01, 0x02]);
    }

    #[test]
    fn decode_stops_at_second_end() {
        let decoded = decode(&[0xC0, 0x01, 0xC0, 0x02, 0xC0]);
        assert_eq!(decoded, vec![0x01]);
    }

    #[test]
    fn decode_passes_unknown_escape_through() {
        let decoded = decode(&[0xC0, 0xDB, 0x7F, 0xC0]);
        assert_eq!(decoded, vec![0xDB, 0x7F]);
    }

    #[test]
    fn decode_empty_frame() {
        assert_eq!(decode(&[0xC0, 0xC0]), Vec::<u8>::new());
        assert_eq!(decode(&[]), Vec::<u8>::new());
    }

    proptest! {
        #[test]
        fn slip_round_trip(data in prop::collection::vec(any::<u8>(), 0..512)) {
            let encoded = encode(&data);
            prop_assert_eq!(decode(&encoded), data);
        }

        #[test]
        fn encoded_interior_has_no_end(data in prop::collection::vec(any::<u8>(), 0..512)) {
            let encoded = encode(&data);
            // Only the two delimiters may be END bytes
            let interior = &encoded[1..encoded.len() - 1];
            prop_assert!(interior.iter().all(|&b| b != END));
        }
    }
}
