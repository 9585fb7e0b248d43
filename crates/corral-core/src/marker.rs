//! Per-repository marker file (§6 "Repository marker file"). Written
//! after a successful clone when `create_marker_file` is set; purely
//! informational, so a write failure here is logged, never fatal to the
//! repository's overall outcome.

use std::path::Path;

use chrono::Utc;
use corral_types::{Protocol, Strategy};

pub const MARKER_FILE: &str = ".gzh";

pub fn write_marker(
    repo_dir: &Path,
    provider: &str,
    full_name: &str,
    clone_url: &str,
    strategy: Strategy,
) -> std::io::Result<()> {
    let body = format!(
        "provider: {provider}\nfull_name: {full_name}\nclone_url: {clone_url}\ncloned_at: {}\nstrategy: {strategy:?}\n",
        Utc::now().to_rfc3339(),
    );
    std::fs::write(repo_dir.join(MARKER_FILE), body)
}

pub fn protocol_label(protocol: Protocol) -> &'static str {
    match protocol {
        Protocol::Https => "https",
        Protocol::Ssh => "ssh",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_marker_creates_readable_file() {
        let td = tempdir().unwrap();
        write_marker(
            td.path(),
            "github",
            "acme/widgets",
            "https://example.com/acme/widgets.git",
            Strategy::Reset,
        )
        .unwrap();

        let content = std::fs::read_to_string(td.path().join(MARKER_FILE)).unwrap();
        assert!(content.contains("provider: github"));
        assert!(content.contains("full_name: acme/widgets"));
    }
}
