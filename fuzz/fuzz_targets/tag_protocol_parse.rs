#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    let _ = shipyard_changelog::parse_tag_protocol(data);
});
