#![no_main]

use corral_types::{RepoStatus, Repository, Session};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    if let Ok(session) = serde_json::from_str::<Session>(data) {
        if let Ok(roundtripped) = serde_json::to_string(&session) {
            if let Ok(parsed) = serde_json::from_str::<Session>(&roundtripped) {
                assert_eq!(session.id, parsed.id);
                assert_eq!(session.repos.len(), parsed.repos.len());
            }
        }
    }

    if let Ok(status) = serde_json::from_str::<RepoStatus>(data) {
        if let Ok(roundtripped) = serde_json::to_string(&status) {
            let parsed: RepoStatus = serde_json::from_str(&roundtripped)
                .expect("a value we just serialized must deserialize");
            assert_eq!(status.state, parsed.state);
        }
    }

    if let Ok(repo) = serde_json::from_str::<Repository>(data) {
        if let Ok(roundtripped) = serde_json::to_string(&repo) {
            let parsed: Repository = serde_json::from_str(&roundtripped)
                .expect("a value we just serialized must deserialize");
            assert_eq!(repo.full_name, parsed.full_name);
        }
    }
});
