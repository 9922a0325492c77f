//! Fuzz target: parsing and validation of the `POST /v1/vms` body.
//!
//! Arbitrary bytes must never panic. Anything accepted must carry a name
//! and launch profile that are safe to put on a kernel command line.

#![no_main]

use libfuzzer_sys::fuzz_target;
use vmctl_gateway::routes::parse_start_body;

fuzz_target!(|data: &[u8]| {
    if let Ok((name, entry_point)) = parse_start_body(data) {
        assert!(!name.as_str().is_empty());
        if let Some(entry_point) = entry_point {
            assert!(!entry_point.chars().any(char::is_whitespace));
        }
    }
});
