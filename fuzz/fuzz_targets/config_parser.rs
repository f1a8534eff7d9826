#![no_main]

use libfuzzer_sys::fuzz_target;
use sniffer::{LogLevel, ProfileConfig, SortKey};

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // None of these may panic, whatever the input
        let _ = ProfileConfig::from_toml_str(input);
        let _ = input.parse::<SortKey>();
        let _ = input.parse::<LogLevel>();
    }
});
