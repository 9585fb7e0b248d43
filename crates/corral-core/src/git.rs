//! Git subprocess wrapper (§6 "Git subprocess contract").
//!
//! All git invocations go through [`run_git`] so tests can redirect the
//! binary via `CORRAL_GIT_BIN`.

use std::env;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use corral_types::{CorralError, ErrorContext};

use crate::cancel::CancellationToken;

#[derive(Debug, Clone)]
pub struct GitOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration: Duration,
}

impl GitOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

fn git_program() -> String {
    env::var("CORRAL_GIT_BIN").unwrap_or_else(|_| "git".to_string())
}

/// Run `git <args>` in `dir`, polling for the process to exit and killing
/// it on timeout or cancellation.
pub fn run_git(
    args: &[&str],
    dir: &Path,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<GitOutput, CorralError> {
    let ctx = || {
        ErrorContext::new("git")
            .with_resource(format!("{} {:?}", dir.display(), args))
    };

    let start = Instant::now();
    let mut command = Command::new(git_program());
    command
        .args(args)
        .current_dir(dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|e| CorralError::GitCommand {
        ctx: ctx(),
        message: format!("failed to spawn git: {e}"),
    })?;

    let deadline = Instant::now() + timeout;
    loop {
        if cancel.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(CorralError::cancelled(ctx()));
        }

        match child.try_wait().map_err(|e| CorralError::GitCommand {
            ctx: ctx(),
            message: format!("failed to poll git: {e}"),
        })? {
            Some(status) => {
                return Ok(GitOutput {
                    exit_code: status.code().unwrap_or(-1),
                    stdout: read_pipe(child.stdout.take()),
                    stderr: read_pipe(child.stderr.take()),
                    timed_out: false,
                    duration: start.elapsed(),
                });
            }
            None => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Ok(GitOutput {
                        exit_code: -1,
                        stdout: read_pipe(child.stdout.take()),
                        stderr: format!(
                            "git timed out after {}",
                            humantime::format_duration(timeout)
                        ),
                        timed_out: true,
                        duration: start.elapsed(),
                    });
                }
                std::thread::sleep(Duration::from_millis(100));
            }
        }
    }
}

fn read_pipe<R: Read>(stream: Option<R>) -> String {
    let mut buffer = Vec::new();
    if let Some(mut s) = stream {
        let _ = s.read_to_end(&mut buffer);
    }
    String::from_utf8_lossy(&buffer).to_string()
}

fn to_error(output: &GitOutput, ctx: ErrorContext) -> CorralError {
    if output.timed_out {
        CorralError::Timeout {
            ctx,
            message: output.stderr.clone(),
        }
    } else {
        CorralError::GitCommand {
            ctx,
            message: output.stderr.clone(),
        }
    }
}

/// Full clone of `url` into `dest` (§4.3 "clone path"). `depth == 0` means
/// a full clone; `single_branch` restricts the fetch to one ref.
pub fn clone(
    url: &str,
    dest: &Path,
    branch: Option<&str>,
    depth: u32,
    single_branch: bool,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(), CorralError> {
    let mut args: Vec<&str> = vec!["clone"];
    let depth_arg;
    if depth > 0 {
        depth_arg = depth.to_string();
        args.push("--depth");
        args.push(&depth_arg);
    }
    if single_branch {
        args.push("--single-branch");
    }
    if let Some(b) = branch {
        args.push("--branch");
        args.push(b);
    }
    let dest_str = dest.to_string_lossy().to_string();
    args.push(url);
    args.push(&dest_str);

    let parent = dest.parent().unwrap_or(Path::new("."));
    let ctx = ErrorContext::new("clone").with_resource(url);
    let output = run_git(&args, parent, timeout, cancel)?;
    if output.success() {
        Ok(())
    } else {
        Err(to_error(&output, ctx))
    }
}

/// Update an existing checkout per the chosen [`corral_types::Strategy`]
/// (§4.3 "Strategy sub-decision"): `Reset` hard-resets to the remote's
/// default branch tip, `Pull` fast-forwards, `Fetch` only updates remote
/// refs without touching the working tree.
pub fn update(
    dir: &Path,
    strategy: corral_types::Strategy,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(), CorralError> {
    let ctx = ErrorContext::new("update").with_resource(dir.to_string_lossy());

    match strategy {
        corral_types::Strategy::Fetch => {
            let output = run_git(&["fetch", "--all", "--prune"], dir, timeout, cancel)?;
            if output.success() {
                Ok(())
            } else {
                Err(to_error(&output, ctx))
            }
        }
        corral_types::Strategy::Pull => {
            let output = run_git(&["pull", "--ff-only"], dir, timeout, cancel)?;
            if output.success() {
                Ok(())
            } else {
                Err(to_error(&output, ctx))
            }
        }
        corral_types::Strategy::Reset => {
            let fetch = run_git(&["fetch", "--all", "--prune"], dir, timeout, cancel)?;
            if !fetch.success() {
                return Err(to_error(&fetch, ctx));
            }
            let head = run_git(
                &["rev-parse", "--abbrev-ref", "origin/HEAD"],
                dir,
                timeout,
                cancel,
            )?;
            let target = if head.success() {
                head.stdout.trim().to_string()
            } else {
                "origin/HEAD".to_string()
            };
            let reset = run_git(&["reset", "--hard", &target], dir, timeout, cancel)?;
            if reset.success() {
                Ok(())
            } else {
                Err(to_error(&reset, ctx))
            }
        }
    }
}

pub fn is_git_repository(dir: &Path) -> bool {
    dir.join(".git").exists()
}

/// `git clone --mirror` into `dest`, used by the code-sync engine (§4.6)
/// to stage a bare copy of every ref before pushing it to the
/// destination. Unlike [`clone`] this always pulls every branch and tag.
pub fn clone_mirror(
    url: &str,
    dest: &Path,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(), CorralError> {
    let dest_str = dest.to_string_lossy().to_string();
    let args = ["clone", "--mirror", url, &dest_str];
    let parent = dest.parent().unwrap_or(Path::new("."));
    let ctx = ErrorContext::new("clone_mirror").with_resource(url);
    let output = run_git(&args, parent, timeout, cancel)?;
    if output.success() {
        Ok(())
    } else {
        Err(to_error(&output, ctx))
    }
}

/// Push every ref from a mirrored bare repo at `mirror_dir` to
/// `destination_url`. `force` is used for the one-shot retry the sync
/// engine performs when an empty destination rejects the first
/// non-fast-forward push (§4.6 "code sync").
pub fn push_mirror(
    mirror_dir: &Path,
    destination_url: &str,
    force: bool,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<GitOutput, CorralError> {
    let mut args: Vec<&str> = vec!["push", "--mirror"];
    if force {
        args.push("--force");
    }
    args.push(destination_url);

    let ctx = ErrorContext::new("push_mirror").with_resource(destination_url);
    let output = run_git(&args, mirror_dir, timeout, cancel)?;
    if output.success() {
        Ok(output)
    } else {
        Err(to_error(&output, ctx))
    }
}

/// Whether a failed `push --mirror` looks like the "destination already
/// has diverging history" case the sync engine retries once with
/// `--force`, rather than a hard failure (auth, network, missing repo).
pub fn is_empty_push_rejection(stderr: &str) -> bool {
    stderr.contains("[rejected]")
        || stderr.contains("non-fast-forward")
        || stderr.contains("failed to push some refs")
}

/// Whether a `push --mirror` stderr only complains about tags with no
/// matching object, which the sync engine treats as non-fatal (a source
/// repo with no tags is not an error).
pub fn is_missing_tags_only(stderr: &str) -> bool {
    let meaningful_lines: Vec<&str> = stderr
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter(|l| !l.contains("new branch") && !l.contains("new tag"))
        .collect();
    !meaningful_lines.is_empty()
        && meaningful_lines
            .iter()
            .all(|l| l.contains("tag") || l.starts_with("To ") || l.contains("Everything up-to-date"))
}
