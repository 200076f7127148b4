//! Fuzz target for the batch response splitter.
//!
//! Arbitrary plaintext must split or error, never panic; every embedded
//! payload must lie within the input.

#![no_main]

use atslink_proto::batch::split_batch;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(parts) = split_batch(data) {
        for part in parts {
            assert!(part.len() <= data.len());
        }
    }
});
