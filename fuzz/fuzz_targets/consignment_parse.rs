#![no_main]

use libfuzzer_sys::fuzz_target;
use std::path::Path;

fuzz_target!(|data: &str| {
    let _ = shipyard_store::parse(data, Path::new("fuzz.md"));
});
