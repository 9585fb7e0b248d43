#![no_main]

use std::time::Duration;

use corral_core::Deduplicator;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (String, u8, u32)| {
    let (key, ttl_secs, value) = data;
    if key.is_empty() {
        return;
    }

    let dedup: Deduplicator<u32> = Deduplicator::new(Duration::from_secs(ttl_secs as u64 + 1));

    let first = dedup.get_or_insert_with(&key, || value);
    let second = dedup.get_or_insert_with(&key, || value.wrapping_add(1));

    // Once cached, the second call must observe the first call's result,
    // not its own (§4.5, §8 Scenario property 5: "all N callers observe
    // the same result").
    assert_eq!(first, second);
});
