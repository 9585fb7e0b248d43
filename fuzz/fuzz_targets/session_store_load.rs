#![no_main]

use std::fs;

use corral_core::store::SessionStore;
use libfuzzer_sys::fuzz_target;
use tempfile::tempdir;

fuzz_target!(|data: &[u8]| {
    let td = match tempdir() {
        Ok(v) => v,
        Err(_) => return,
    };

    let path = td.path().join("deadbeefcafef00d.json");
    if fs::write(path, data).is_err() {
        return;
    }

    let store = SessionStore::new(td.path().to_path_buf());
    let _ = store.load("deadbeefcafef00d");
});
