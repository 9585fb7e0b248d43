#![no_main]

use corral_core::config::CorralConfig;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Must never panic on arbitrary YAML, valid or not (§6 "validator
    // enforces" / §7 config errors are `Validation`, not crashes).
    let _ = CorralConfig::load_from_str(data);
});
