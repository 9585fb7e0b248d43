//! Bounded worker pool over a single shared task queue (§4.3 "Parallel
//! Executor & State Machine"). Workers pull continuously from one
//! `mpsc` queue so a worker that finishes early never idles waiting for
//! a chunk boundary.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use corral_retry::RetryExecutor;
use corral_types::{CloneOptions, CorralError, ErrorContext, Session};

use crate::cancel::CancellationToken;
use crate::filter::PlannedRepository;
use crate::git;
use crate::marker;

/// What a worker reports back for one repository (§8 "every repository
/// reaches a terminal state").
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub full_name: String,
    pub result: Result<(), CorralError>,
}

pub trait Reporter: Send {
    fn repo_started(&mut self, full_name: &str);
    fn repo_finished(&mut self, outcome: &TaskOutcome);
}

struct ReporterHandle(Arc<Mutex<dyn Reporter>>);

impl ReporterHandle {
    fn started(&self, full_name: &str) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).repo_started(full_name);
    }
    fn finished(&self, outcome: &TaskOutcome) {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .repo_finished(outcome);
    }
}

/// Drive `plan` to completion (or cancellation), updating `session` in
/// place as each repository's status advances. Returns once every
/// repository has reached `completed` or `failed`, or cancellation was
/// observed.
pub fn run(
    plan: Vec<PlannedRepository>,
    options: Arc<CloneOptions>,
    session: Arc<Mutex<Session>>,
    cancel: CancellationToken,
    reporter: Arc<Mutex<dyn Reporter>>,
) -> Vec<TaskOutcome> {
    let (tx, rx) = mpsc::channel::<PlannedRepository>();
    let rx = Arc::new(Mutex::new(rx));
    let (result_tx, result_rx) = mpsc::channel::<TaskOutcome>();

    for item in plan {
        tx.send(item).expect("receiver outlives all sends");
    }
    drop(tx);

    let worker_count = options.parallel.max(1);
    let mut handles = Vec::with_capacity(worker_count);

    for _ in 0..worker_count {
        let rx = Arc::clone(&rx);
        let result_tx = result_tx.clone();
        let options = Arc::clone(&options);
        let session = Arc::clone(&session);
        let cancel = cancel.clone();
        let reporter = ReporterHandle(Arc::clone(&reporter));

        handles.push(thread::spawn(move || {
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let item = {
                    let rx = rx.lock().unwrap_or_else(|e| e.into_inner());
                    rx.recv()
                };
                let Ok(item) = item else { break };

                let full_name = item.repository.full_name.clone();
                tracing::debug!(full_name = %full_name, "starting repository");
                reporter.started(&full_name);
                {
                    let mut session = session.lock().unwrap_or_else(|e| e.into_inner());
                    if let Some(status) = session.repos.get_mut(&full_name) {
                        status.start_attempt();
                    }
                    session.touch();
                }

                let on_attempt = {
                    let session = Arc::clone(&session);
                    let full_name = full_name.clone();
                    move |_attempt: u32| {
                        let mut session = session.lock().unwrap_or_else(|e| e.into_inner());
                        if let Some(status) = session.repos.get_mut(&full_name) {
                            status.start_attempt();
                        }
                        session.touch();
                    }
                };
                let outcome = process_one(&item, &options, &cancel, on_attempt);

                match &outcome.result {
                    Ok(()) => tracing::debug!(full_name = %full_name, "repository completed"),
                    Err(e) => tracing::warn!(full_name = %full_name, error = %e, "repository failed"),
                }

                {
                    let mut session = session.lock().unwrap_or_else(|e| e.into_inner());
                    if let Some(status) = session.repos.get_mut(&full_name) {
                        match &outcome.result {
                            Ok(()) => status.complete(),
                            Err(e) => status.fail(e.to_string()),
                        }
                    }
                    session.touch();
                }

                reporter.finished(&outcome);
                if result_tx.send(outcome).is_err() {
                    break;
                }
            }
        }));
    }

    drop(result_tx);
    for handle in handles {
        let _ = handle.join();
    }

    result_rx.iter().collect()
}

fn process_one(
    item: &PlannedRepository,
    options: &CloneOptions,
    cancel: &CancellationToken,
    mut on_attempt: impl FnMut(u32),
) -> TaskOutcome {
    let full_name = item.repository.full_name.clone();
    let target: PathBuf = item.target_path.clone();
    let url = item.repository.clone_url(options.protocol).to_string();
    let branch = options.branch.clone();
    let strategy = options.strategy;
    let depth = options.depth;
    let single_branch = options.single_branch;
    let timeout = options.timeout;
    let provider = options.provider.clone();
    let create_marker = options.create_marker_file;

    let retry_config = corral_retry::RetryStrategyConfig {
        strategy: corral_retry::RetryStrategyType::Exponential,
        max_attempts: options.max_retries + 1,
        base_delay: options.retry_delay,
        max_delay: options.retry_delay.saturating_mul(16),
        jitter: 0.3,
    };
    let executor = RetryExecutor::new(retry_config);

    let result = executor.run(
        || cancel.is_cancelled(),
        |attempt| {
            if attempt > 1 {
                // Attempt 1's `start_attempt()` already ran before
                // `process_one` was dispatched; each retry inside the
                // executor needs its own re-entry recorded so the
                // session's `attempts` counter reflects every attempt
                // actually made (§3, §8 invariant 2).
                on_attempt(attempt);
                tracing::debug!(full_name = %full_name, attempt, "retrying after previous failure");
            }
            if options.dry_run {
                return Ok(());
            }
            if git::is_git_repository(&target) {
                git::update(&target, strategy, timeout, cancel)
            } else {
                clone_fresh(
                    &url,
                    &target,
                    branch.as_deref(),
                    depth,
                    single_branch,
                    timeout,
                    cancel,
                )
            }
        },
    );

    if result.is_ok() && create_marker {
        if let Err(e) = marker::write_marker(&target, &provider, &full_name, &url, strategy) {
            tracing::warn!(full_name = %full_name, error = %e, "failed to write marker file");
        }
    }

    TaskOutcome { full_name, result }
}

/// Clone into a target directory that does not exist yet (§4.3 "If the
/// target directory does not exist"): create the parent directory tree
/// with mode 0755, then clone, removing whatever was created if the
/// clone itself fails so a retry starts from a clean slate.
fn clone_fresh(
    url: &str,
    target: &Path,
    branch: Option<&str>,
    depth: u32,
    single_branch: bool,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(), CorralError> {
    if let Some(parent) = target.parent() {
        create_dir_all_0755(parent).map_err(|e| CorralError::Permissions {
            ctx: ErrorContext::new("create_parent_dir").with_resource(parent.to_string_lossy()),
            message: format!("failed to create parent directories: {e}"),
        })?;
    }

    match git::clone(url, target, branch, depth, single_branch, timeout, cancel) {
        Ok(()) => Ok(()),
        Err(e) => {
            if target.exists() {
                let _ = std::fs::remove_dir_all(target);
            }
            Err(e)
        }
    }
}

#[cfg(unix)]
fn create_dir_all_0755(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(dir)
}

#[cfg(not(unix))]
fn create_dir_all_0755(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)
}

/// Summary statistics over a completed run, suitable for the CLI's final
/// human/JSON/table report (§7 "user surface formats").
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub completed: Vec<String>,
    pub failed: BTreeMap<String, String>,
}

impl RunSummary {
    pub fn from_outcomes(outcomes: &[TaskOutcome]) -> Self {
        let mut summary = RunSummary::default();
        for outcome in outcomes {
            match &outcome.result {
                Ok(()) => summary.completed.push(outcome.full_name.clone()),
                Err(e) => {
                    summary
                        .failed
                        .insert(outcome.full_name.clone(), e.to_string());
                }
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use corral_types::{CloneOptionsBuilder, RepoState, Repository};
    use std::collections::BTreeMap as StdBTreeMap;
    use std::env;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    struct NullReporter;
    impl Reporter for NullReporter {
        fn repo_started(&mut self, _full_name: &str) {}
        fn repo_finished(&mut self, _outcome: &TaskOutcome) {}
    }

    fn write_fake_git(bin_dir: &std::path::Path, body: &str) -> PathBuf {
        let path = bin_dir.join("git");
        std::fs::write(&path, format!("#!/usr/bin/env sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn repo(name: &str) -> Repository {
        Repository {
            id: name.into(),
            name: name.into(),
            full_name: format!("acme/{name}"),
            owner: "acme".into(),
            clone_url_https: format!("https://example.com/acme/{name}.git"),
            clone_url_ssh: format!("git@example.com:acme/{name}.git"),
            default_branch: "main".into(),
            private: false,
            archived: false,
            fork: false,
            language: None,
            topics: vec![],
            stars: 0,
            updated_at: Utc::now(),
            provider_data: StdBTreeMap::new(),
        }
    }

    #[test]
    fn run_processes_every_repo_to_completion() {
        let td = tempdir().unwrap();
        let bin = td.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let fake_git = write_fake_git(&bin, "exit 0");
        unsafe { env::set_var("CORRAL_GIT_BIN", fake_git.to_str().unwrap()) };

        let options = Arc::new(
            CloneOptionsBuilder {
                provider: "github".into(),
                org: "acme".into(),
                target_root: td.path().to_path_buf(),
                parallel: 2,
                ..Default::default()
            }
            .validate()
            .unwrap(),
        );

        let plan: Vec<_> = ["one", "two", "three"]
            .iter()
            .map(|n| PlannedRepository {
                repository: repo(n),
                target_path: td.path().join(n),
            })
            .collect();

        let session = Arc::new(Mutex::new(Session::new(
            &options,
            plan.iter().map(|p| p.repository.full_name.clone()),
        )));

        let outcomes = run(
            plan,
            options,
            Arc::clone(&session),
            CancellationToken::new(),
            Arc::new(Mutex::new(NullReporter)),
        );

        assert_eq!(outcomes.len(), 3);
        let summary = RunSummary::from_outcomes(&outcomes);
        assert_eq!(summary.completed.len(), 3);
        assert!(summary.failed.is_empty());

        let session = session.lock().unwrap();
        assert!(!session.is_active());

        unsafe { env::remove_var("CORRAL_GIT_BIN") };
    }

    /// §8 Scenario C: a clone that fails on attempts 1 and 2 and succeeds
    /// on attempt 3 must complete, with the session recording all 3
    /// attempts (not just the 1 the dispatch loop sees directly). The
    /// first two attempts are made to time out (a `Timeout` is
    /// retryable; a plain nonzero exit classifies as `GitCommand`, which
    /// isn't) so the retry actually exercises the executor's retryable
    /// path.
    #[test]
    fn run_retries_and_records_every_attempt_in_session() {
        let td = tempdir().unwrap();
        let bin = td.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let counter = td.path().join("attempts.count");
        std::fs::write(&counter, "0").unwrap();
        let script = format!(
            "count=$(cat '{counter}')\n\
             count=$((count + 1))\n\
             echo \"$count\" > '{counter}'\n\
             if [ \"$count\" -lt 3 ]; then\n  sleep 1\nfi\n\
             mkdir -p \"$3\"\n\
             exit 0\n",
            counter = counter.display()
        );
        let fake_git = write_fake_git(&bin, &script);
        unsafe { env::set_var("CORRAL_GIT_BIN", fake_git.to_str().unwrap()) };

        let options = Arc::new(
            CloneOptionsBuilder {
                provider: "github".into(),
                org: "acme".into(),
                target_root: td.path().to_path_buf(),
                max_retries: 2,
                retry_delay: Duration::from_millis(1),
                timeout: Duration::from_millis(100),
                ..Default::default()
            }
            .validate()
            .unwrap(),
        );

        let plan = vec![PlannedRepository {
            repository: repo("flaky"),
            target_path: td.path().join("flaky"),
        }];
        let session = Arc::new(Mutex::new(Session::new(
            &options,
            plan.iter().map(|p| p.repository.full_name.clone()),
        )));

        let outcomes = run(
            plan,
            options,
            Arc::clone(&session),
            CancellationToken::new(),
            Arc::new(Mutex::new(NullReporter)),
        );

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].result.is_ok());

        let session = session.lock().unwrap();
        let status = &session.repos["acme/flaky"];
        assert_eq!(status.state, RepoState::Completed);
        assert_eq!(status.attempts, 3);

        unsafe { env::remove_var("CORRAL_GIT_BIN") };
    }

    #[test]
    fn run_records_failures_without_aborting_other_workers() {
        let td = tempdir().unwrap();
        let bin = td.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let fake_git = write_fake_git(&bin, "echo 'fatal: boom' 1>&2\nexit 1");
        unsafe { env::set_var("CORRAL_GIT_BIN", fake_git.to_str().unwrap()) };

        let options = Arc::new(
            CloneOptionsBuilder {
                provider: "github".into(),
                org: "acme".into(),
                target_root: td.path().to_path_buf(),
                max_retries: 1,
                ..Default::default()
            }
            .validate()
            .unwrap(),
        );

        let plan = vec![PlannedRepository {
            repository: repo("broken"),
            target_path: td.path().join("broken"),
        }];
        let session = Arc::new(Mutex::new(Session::new(
            &options,
            plan.iter().map(|p| p.repository.full_name.clone()),
        )));

        let outcomes = run(
            plan,
            options,
            session,
            CancellationToken::new(),
            Arc::new(Mutex::new(NullReporter)),
        );

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].result.is_err());

        unsafe { env::remove_var("CORRAL_GIT_BIN") };
    }

    #[test]
    fn dry_run_never_invokes_git() {
        let td = tempdir().unwrap();
        unsafe { env::set_var("CORRAL_GIT_BIN", "/nonexistent/git") };

        let options = Arc::new(
            CloneOptionsBuilder {
                provider: "github".into(),
                org: "acme".into(),
                target_root: td.path().to_path_buf(),
                dry_run: true,
                ..Default::default()
            }
            .validate()
            .unwrap(),
        );

        let plan = vec![PlannedRepository {
            repository: repo("dry"),
            target_path: td.path().join("dry"),
        }];
        let session = Arc::new(Mutex::new(Session::new(
            &options,
            plan.iter().map(|p| p.repository.full_name.clone()),
        )));

        let outcomes = run(
            plan,
            options,
            session,
            CancellationToken::new(),
            Arc::new(Mutex::new(NullReporter)),
        );
        assert!(outcomes[0].result.is_ok());

        unsafe { env::remove_var("CORRAL_GIT_BIN") };
    }
}
