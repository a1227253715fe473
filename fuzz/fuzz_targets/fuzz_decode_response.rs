//! Fuzz target for batch response decoding.
//!
//! Arbitrary JSON must decode to slots or a `DecodeError`, never a panic,
//! and every decoded slot must line up with one response entry.

#![no_main]

use coalesce_core::scheduler::decode_response;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    if let Ok(slots) = decode_response(&value) {
        let entries = value.as_array().map(|a| a.len()).unwrap_or(0);
        assert_eq!(slots.len(), entries);
    }
});
