//! Environment fingerprint collection: probes this crate's own toolchain
//! version and the external `git` binary it shells out to.

use serde::{Deserialize, Serialize};
use std::process::Command;

use crate::git;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvironmentFingerprint {
    pub corral_version: String,
    pub git_version: Option<String>,
    pub os: String,
    pub arch: String,
}

pub fn collect_environment_fingerprint() -> EnvironmentFingerprint {
    EnvironmentFingerprint {
        corral_version: env!("CARGO_PKG_VERSION").to_string(),
        git_version: get_git_version(),
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
    }
}

fn get_git_version() -> Option<String> {
    let program = std::env::var("CORRAL_GIT_BIN").unwrap_or_else(|_| "git".to_string());
    let output = Command::new(program).arg("--version").output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    // "git version 2.43.0" -> "2.43.0"
    text.trim().rsplit(' ').next().map(|s| s.to_string())
}

pub fn git_is_available() -> bool {
    which::which(std::env::var("CORRAL_GIT_BIN").unwrap_or_else(|_| "git".to_string())).is_ok()
        || get_git_version().is_some()
}

/// Re-exported for callers that only need the repository check, so they
/// don't have to depend on the `git` module directly.
pub fn is_git_repository(dir: &std::path::Path) -> bool {
    git::is_git_repository(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_fingerprint_has_nonempty_os_and_arch() {
        let fp = collect_environment_fingerprint();
        assert!(!fp.os.is_empty());
        assert!(!fp.arch.is_empty());
        assert_eq!(fp.corral_version, env!("CARGO_PKG_VERSION"));
    }
}
