//! Fuzz target: `VmName` validation.
//!
//! Accepted names must be usable as a single path component.

#![no_main]

use libfuzzer_sys::fuzz_target;
use vmctl_core::{VmName, MAX_NAME_LEN};

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(name) = VmName::new(raw) {
        let s = name.as_str();
        assert!(!s.is_empty() && s.len() <= MAX_NAME_LEN);
        assert!(!s.contains('/') && s != "." && s != "..");
        let reparsed: Result<VmName, _> = serde_json::from_value(serde_json::Value::String(s.to_owned()));
        assert!(reparsed.is_ok());
    }
});
