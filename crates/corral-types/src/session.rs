use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::options::CloneOptions;

/// Durable, resumable record of one run (§3 "Session", §4.4). Persisted as
/// `<session_dir>/<id>.json` by the session store; `repos` is the single
/// source of truth for what has and hasn't been processed across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub provider: String,
    pub org: String,
    pub target_root: std::path::PathBuf,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub repos: BTreeMap<String, RepoStatus>,
}

impl Session {
    /// Build a fresh session from a frozen options value and the resolved
    /// repository set. `id` is a random 16-hex-digit string, matching the
    /// wire format shown in §6's session file examples.
    pub fn new(options: &CloneOptions, full_names: impl IntoIterator<Item = String>) -> Self {
        let now = Utc::now();
        let repos = full_names
            .into_iter()
            .map(|name| (name, RepoStatus::pending()))
            .collect();
        Self {
            id: generate_session_id(),
            provider: options.provider.clone(),
            org: options.org.clone(),
            target_root: options.target_root.clone(),
            created_at: now,
            updated_at: now,
            repos,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn stats(&self) -> SessionStats {
        let mut stats = SessionStats::default();
        for status in self.repos.values() {
            stats.total += 1;
            match status.state {
                RepoState::Pending => stats.pending += 1,
                RepoState::InProgress => stats.in_progress += 1,
                RepoState::Completed => stats.completed += 1,
                RepoState::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Whether any repository is still pending or in progress (§4.4:
    /// a session is "active" until every entry reaches a terminal state).
    pub fn is_active(&self) -> bool {
        self.repos
            .values()
            .any(|s| matches!(s.state, RepoState::Pending | RepoState::InProgress))
    }
}

/// A random 16-hex-digit session id (§3 "Session"). Collision odds across
/// one operator's session directory are astronomically low, so no
/// uniqueness check against existing files is needed.
fn generate_session_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..8).map(|_| format!("{:02x}", rng.r#gen::<u8>())).collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Per-repository progress record, the unit the retry/backoff state
/// machine (§4.3) advances through `pending -> in_progress ->
/// {completed|failed}`, with failures re-entering `in_progress` on retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoStatus {
    pub state: RepoState,
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl RepoStatus {
    pub fn pending() -> Self {
        Self {
            state: RepoState::Pending,
            attempts: 0,
            started_at: None,
            last_attempt_at: None,
            completed_at: None,
            error: None,
        }
    }

    pub fn start_attempt(&mut self) {
        let now = Utc::now();
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.last_attempt_at = Some(now);
        self.attempts += 1;
        self.state = RepoState::InProgress;
        self.completed_at = None;
        self.error = None;
    }

    pub fn complete(&mut self) {
        self.state = RepoState::Completed;
        self.completed_at = Some(Utc::now());
        self.error = None;
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.state = RepoState::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(message.into());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoState {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl fmt::Display for RepoState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RepoState::Pending => "pending",
            RepoState::InProgress => "in_progress",
            RepoState::Completed => "completed",
            RepoState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::CloneOptionsBuilder;

    fn options() -> CloneOptions {
        CloneOptionsBuilder {
            provider: "github".into(),
            org: "acme".into(),
            target_root: "/tmp/acme".into(),
            ..Default::default()
        }
        .validate()
        .unwrap()
    }

    #[test]
    fn new_session_starts_all_pending() {
        let session = Session::new(&options(), vec!["acme/widgets".to_string()]);
        assert_eq!(session.repos.len(), 1);
        assert!(session.is_active());
        let stats = session.stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.pending, 1);
    }

    #[test]
    fn status_lifecycle_transitions() {
        let mut status = RepoStatus::pending();
        assert_eq!(status.state, RepoState::Pending);

        status.start_attempt();
        assert_eq!(status.state, RepoState::InProgress);
        assert_eq!(status.attempts, 1);
        assert!(status.started_at.is_some());

        status.fail("network blip");
        assert_eq!(status.state, RepoState::Failed);
        assert_eq!(status.error.as_deref(), Some("network blip"));
        assert!(status.completed_at.is_some());

        status.start_attempt();
        assert_eq!(status.attempts, 2);
        assert_eq!(status.state, RepoState::InProgress);
        assert!(status.error.is_none());
        assert!(status.completed_at.is_none());

        status.complete();
        assert_eq!(status.state, RepoState::Completed);
        assert!(status.completed_at.is_some());
    }

    #[test]
    fn is_active_becomes_false_once_all_terminal() {
        let mut session = Session::new(&options(), vec!["acme/widgets".to_string()]);
        let status = session.repos.get_mut("acme/widgets").unwrap();
        status.start_attempt();
        status.complete();
        assert!(!session.is_active());
    }
}
