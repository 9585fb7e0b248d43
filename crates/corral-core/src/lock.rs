//! Lock file enforcing single-writer-per-session (§3 invariant,
//! §4.4 "Session Store"). Stored as `<state_dir>/lock`, same atomic
//! tmp-then-rename write pattern as the session store itself.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use corral_types::{CorralError, ErrorContext};
use serde::{Deserialize, Serialize};

pub const LOCK_FILE: &str = "lock";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub hostname: String,
    pub acquired_at: DateTime<Utc>,
    pub session_id: Option<String>,
}

#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    pub fn acquire(state_dir: &Path) -> Result<Self, CorralError> {
        let ctx = || ErrorContext::new("acquire_lock").with_resource(state_dir.to_string_lossy());
        let lock_path = state_dir.join(LOCK_FILE);

        fs::create_dir_all(state_dir).map_err(|e| CorralError::Internal {
            ctx: ctx(),
            message: format!("failed to create state dir: {e}"),
        })?;

        if lock_path.exists() {
            let existing = Self::read_lock_info(state_dir)?;
            return Err(CorralError::Conflict {
                ctx: ctx(),
                message: format!(
                    "lock already held by pid {} on {} since {} (session: {:?})",
                    existing.pid, existing.hostname, existing.acquired_at, existing.session_id
                ),
            });
        }

        let info = LockInfo {
            pid: std::process::id(),
            hostname: gethostname::gethostname().to_string_lossy().to_string(),
            acquired_at: Utc::now(),
            session_id: None,
        };
        write_lock_atomically(&lock_path, &info, &ctx)?;

        Ok(Self { path: lock_path })
    }

    /// Like [`acquire`](Self::acquire) but first removes a lock whose
    /// `acquired_at` is older than `timeout`, treating it as abandoned by a
    /// crashed process (§4.4 "stale lock recovery").
    pub fn acquire_with_timeout(state_dir: &Path, timeout: Duration) -> Result<Self, CorralError> {
        let lock_path = state_dir.join(LOCK_FILE);
        let ctx = || ErrorContext::new("acquire_lock").with_resource(state_dir.to_string_lossy());

        if lock_path.exists() {
            match Self::read_lock_info(state_dir) {
                Ok(info) => {
                    let age = Utc::now() - info.acquired_at;
                    if age.num_seconds().unsigned_abs() > timeout.as_secs() {
                        fs::remove_file(&lock_path).map_err(|e| CorralError::Internal {
                            ctx: ctx(),
                            message: format!("failed to remove stale lock: {e}"),
                        })?;
                    } else {
                        return Err(CorralError::Conflict {
                            ctx: ctx(),
                            message: format!(
                                "lock already held by pid {} on {} (age {}s)",
                                info.pid,
                                info.hostname,
                                age.num_seconds()
                            ),
                        });
                    }
                }
                Err(_) => {
                    fs::remove_file(&lock_path).map_err(|e| CorralError::Internal {
                        ctx: ctx(),
                        message: format!("failed to remove corrupt lock: {e}"),
                    })?;
                }
            }
        }

        Self::acquire(state_dir)
    }

    pub fn release(&mut self) -> Result<(), CorralError> {
        if self.path.exists() {
            fs::remove_file(&self.path).map_err(|e| CorralError::Internal {
                ctx: ErrorContext::new("release_lock"),
                message: format!("failed to remove lock file: {e}"),
            })?;
        }
        Ok(())
    }

    pub fn set_session_id(&self, session_id: &str) -> Result<(), CorralError> {
        let ctx = || ErrorContext::new("set_session_id");
        if !self.path.exists() {
            return Err(CorralError::Internal {
                ctx: ctx(),
                message: format!("lock file does not exist at {}", self.path.display()),
            });
        }
        let mut info = read_lock_info_from_path(&self.path)?;
        info.session_id = Some(session_id.to_string());
        write_lock_atomically(&self.path, &info, &ctx)
    }

    pub fn is_locked(state_dir: &Path) -> Result<bool, CorralError> {
        Ok(state_dir.join(LOCK_FILE).exists())
    }

    pub fn read_lock_info(state_dir: &Path) -> Result<LockInfo, CorralError> {
        read_lock_info_from_path(&state_dir.join(LOCK_FILE))
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

fn write_lock_atomically(
    path: &Path,
    info: &LockInfo,
    ctx: &impl Fn() -> ErrorContext,
) -> Result<(), CorralError> {
    let json = serde_json::to_string_pretty(info).map_err(|e| CorralError::Internal {
        ctx: ctx(),
        message: format!("failed to serialize lock info: {e}"),
    })?;

    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path).map_err(|e| CorralError::Internal {
            ctx: ctx(),
            message: format!("failed to create lock tmp file: {e}"),
        })?;
        file.write_all(json.as_bytes())
            .map_err(|e| CorralError::Internal {
                ctx: ctx(),
                message: format!("failed to write lock tmp file: {e}"),
            })?;
        file.sync_all().map_err(|e| CorralError::Internal {
            ctx: ctx(),
            message: format!("failed to sync lock file: {e}"),
        })?;
    }
    fs::rename(&tmp_path, path).map_err(|e| CorralError::Internal {
        ctx: ctx(),
        message: format!("failed to rename lock file into place: {e}"),
    })
}

fn read_lock_info_from_path(path: &Path) -> Result<LockInfo, CorralError> {
    let ctx = || ErrorContext::new("read_lock_info").with_resource(path.to_string_lossy());
    let content = fs::read_to_string(path).map_err(|e| CorralError::Internal {
        ctx: ctx(),
        message: format!("failed to read lock file: {e}"),
    })?;
    serde_json::from_str(&content).map_err(|e| CorralError::Internal {
        ctx: ctx(),
        message: format!("failed to parse lock JSON: {e}"),
    })
}

pub fn lock_path(state_dir: &Path) -> PathBuf {
    state_dir.join(LOCK_FILE)
}
