#![no_main]

use libfuzzer_sys::fuzz_target;
use shipyard_config::{Config, ConfigFormat};

fuzz_target!(|data: &str| {
    let _ = Config::load_str(data, ConfigFormat::Yaml);
});
