#![no_main]

use corral_types::CloneOptionsBuilder;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (String, String)| {
    let (match_re, exclude_re) = data;

    let mut builder = CloneOptionsBuilder {
        provider: "github".into(),
        org: "example".into(),
        target_root: "/tmp/corral-fuzz".into(),
        ..Default::default()
    };
    builder.filter_match = Some(match_re);
    builder.filter_exclude = Some(exclude_re);

    // An invalid regex must surface as a `Validation` error, never a
    // panic (§6 "validator enforces ... match, exclude are valid
    // regular expressions").
    let _ = builder.validate();
});
