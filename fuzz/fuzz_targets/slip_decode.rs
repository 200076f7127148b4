//! Fuzz target for the tolerant SLIP decoder.
//!
//! Arbitrary byte soup must never panic or over-read; re-encoding a
//! decoded frame must round-trip.

#![no_main]

use atslink_proto::slip;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let decoded = slip::decode(data);

    // Whatever came out must survive a clean round trip
    let reencoded = slip::encode(&decoded);
    assert_eq!(slip::decode(&reencoded), decoded);
});
