#![no_main]

use corral_duration::parse_duration_arg;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // CLI-facing duration parsing (`--timeout`, `--retry-delay`) must
    // never panic on arbitrary input, only return an error.
    let _ = parse_duration_arg(data);
});
