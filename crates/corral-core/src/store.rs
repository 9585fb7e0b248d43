//! Durable session store (§4.4). A session is one JSON file per run,
//! written atomically (tmp file + rename) so a crash mid-write never
//! leaves a torn file for `resume` to choke on.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use corral_types::{CorralError, ErrorContext, Session};

pub const SESSION_SCHEMA_VERSION: &str = "corral.session.v1";

/// The header fields of a [`Session`] without its potentially large
/// `repos` map (§4.4 "session listing returns just the header fields").
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub provider: String,
    pub org: String,
    pub target_root: PathBuf,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// The default session directory, `~/.corral/sessions`.
    pub fn default_dir() -> Result<PathBuf, CorralError> {
        dirs::home_dir()
            .map(|home| home.join(".corral").join("sessions"))
            .ok_or_else(|| CorralError::Internal {
                ctx: ErrorContext::new("resolve_session_dir"),
                message: "could not determine home directory".into(),
            })
    }

    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    pub fn save(&self, session: &Session) -> Result<(), CorralError> {
        let ctx = || ErrorContext::new("save_session").with_resource(&session.id);
        fs::create_dir_all(&self.dir).map_err(|e| CorralError::Internal {
            ctx: ctx(),
            message: format!("failed to create session dir: {e}"),
        })?;

        let envelope = SessionEnvelope {
            schema_version: SESSION_SCHEMA_VERSION.to_string(),
            session: session.clone(),
        };
        let path = self.path_for(&session.id);
        atomic_write_json(&path, &envelope, &ctx)?;
        tracing::debug!(session_id = %session.id, path = %path.display(), "saved session");
        Ok(())
    }

    pub fn load(&self, id: &str) -> Result<Option<Session>, CorralError> {
        let ctx = || ErrorContext::new("load_session").with_resource(id);
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|e| CorralError::Internal {
            ctx: ctx(),
            message: format!("failed to read session file: {e}"),
        })?;
        let envelope: SessionEnvelope =
            serde_json::from_str(&content).map_err(|e| CorralError::Internal {
                ctx: ctx(),
                message: format!("failed to parse session JSON: {e}"),
            })?;
        validate_schema_version(&envelope.schema_version, &ctx)?;
        Ok(Some(envelope.session))
    }

    /// List every session id that has a file in the store, sorted for
    /// deterministic `list-sessions` output.
    pub fn list_ids(&self) -> Result<Vec<String>, CorralError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        let entries = fs::read_dir(&self.dir).map_err(|e| CorralError::Internal {
            ctx: ErrorContext::new("list_sessions"),
            message: format!("failed to read session dir: {e}"),
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| CorralError::Internal {
                ctx: ErrorContext::new("list_sessions"),
                message: format!("failed to read session dir entry: {e}"),
            })?;
            if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str())
                && entry.path().extension().is_some_and(|ext| ext == "json")
            {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn delete(&self, id: &str) -> Result<(), CorralError> {
        let path = self.path_for(id);
        if path.exists() {
            fs::remove_file(&path).map_err(|e| CorralError::Internal {
                ctx: ErrorContext::new("delete_session").with_resource(id),
                message: format!("failed to remove session file: {e}"),
            })?;
        }
        Ok(())
    }

    /// Read just the header fields of a session without materializing its
    /// `repos` map (§4.4), e.g. for a `list-sessions` summary view over a
    /// store with many large sessions.
    pub fn load_session_info(&self, id: &str) -> Result<Option<SessionInfo>, CorralError> {
        let ctx = || ErrorContext::new("load_session_info").with_resource(id);
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|e| CorralError::Internal {
            ctx: ctx(),
            message: format!("failed to read session file: {e}"),
        })?;
        let envelope: SessionInfoEnvelope =
            serde_json::from_str(&content).map_err(|e| CorralError::Internal {
                ctx: ctx(),
                message: format!("failed to parse session JSON: {e}"),
            })?;
        validate_schema_version(&envelope.schema_version, &ctx)?;
        Ok(Some(envelope.session))
    }

    /// Remove every session file whose last-modified time is older than
    /// `max_age`, returning the ids that were deleted (§4.4 "Cleanup
    /// removes files older than a configurable age"). A session's
    /// `is_active` state is irrelevant here; this is a retention sweep,
    /// not a correctness check, so the caller decides whether that's safe
    /// to run (e.g. never against an in-progress run's own session).
    pub fn cleanup_older_than(&self, max_age: Duration) -> Result<Vec<String>, CorralError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let now = std::time::SystemTime::now();
        let mut removed = Vec::new();
        for id in self.list_ids()? {
            let path = self.path_for(&id);
            let metadata = match fs::metadata(&path) {
                Ok(m) => m,
                Err(_) => continue,
            };
            let modified = metadata.modified().map_err(|e| CorralError::Internal {
                ctx: ErrorContext::new("cleanup_sessions").with_resource(&id),
                message: format!("failed to read mtime: {e}"),
            })?;
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age > max_age {
                self.delete(&id)?;
                tracing::info!(session_id = %id, age_secs = age.as_secs(), "cleaned up stale session");
                removed.push(id);
            }
        }
        Ok(removed)
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct SessionEnvelope {
    schema_version: String,
    session: Session,
}

#[derive(Debug, serde::Deserialize)]
struct SessionInfoEnvelope {
    schema_version: String,
    session: SessionInfo,
}

fn validate_schema_version(
    version: &str,
    ctx: &impl Fn() -> ErrorContext,
) -> Result<(), CorralError> {
    if version != SESSION_SCHEMA_VERSION {
        return Err(CorralError::Validation {
            ctx: ctx(),
            message: format!(
                "unsupported session schema version {version:?}, expected {SESSION_SCHEMA_VERSION:?}"
            ),
        });
    }
    Ok(())
}

fn atomic_write_json<T: serde::Serialize>(
    path: &Path,
    value: &T,
    ctx: &impl Fn() -> ErrorContext,
) -> Result<(), CorralError> {
    let tmp = path.with_extension("tmp");
    let data = serde_json::to_vec_pretty(value).map_err(|e| CorralError::Internal {
        ctx: ctx(),
        message: format!("failed to serialize JSON: {e}"),
    })?;

    {
        let mut file = File::create(&tmp).map_err(|e| CorralError::Internal {
            ctx: ctx(),
            message: format!("failed to create tmp file {}: {e}", tmp.display()),
        })?;
        file.write_all(&data).map_err(|e| CorralError::Internal {
            ctx: ctx(),
            message: format!("failed to write tmp file {}: {e}", tmp.display()),
        })?;
        let _ = file.sync_all();
    }

    fs::rename(&tmp, path).map_err(|e| CorralError::Internal {
        ctx: ctx(),
        message: format!("failed to rename tmp file into place: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_types::{CloneOptionsBuilder, Session};
    use tempfile::tempdir;

    fn sample_session() -> Session {
        let opts = CloneOptionsBuilder {
            provider: "github".into(),
            org: "acme".into(),
            target_root: "/tmp/acme".into(),
            ..Default::default()
        }
        .validate()
        .unwrap();
        Session::new(&opts, vec!["acme/widgets".to_string()])
    }

    #[test]
    fn save_then_load_roundtrips() {
        let td = tempdir().expect("tempdir");
        let store = SessionStore::new(td.path().to_path_buf());
        let session = sample_session();

        store.save(&session).expect("save");
        let loaded = store.load(&session.id).expect("load").expect("present");
        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.repos.len(), 1);
    }

    #[test]
    fn load_missing_session_returns_none() {
        let td = tempdir().expect("tempdir");
        let store = SessionStore::new(td.path().to_path_buf());
        assert!(store.load("does-not-exist").unwrap().is_none());
    }

    #[test]
    fn load_rejects_mismatched_schema_version() {
        let td = tempdir().expect("tempdir");
        let store = SessionStore::new(td.path().to_path_buf());
        let session = sample_session();
        fs::create_dir_all(td.path()).unwrap();
        let path = td.path().join(format!("{}.json", session.id));
        fs::write(
            &path,
            serde_json::json!({"schema_version": "corral.session.v99", "session": session}).to_string(),
        )
        .unwrap();

        let err = store.load(&session.id).unwrap_err();
        assert!(matches!(err, CorralError::Validation { .. }));
    }

    #[test]
    fn list_ids_is_sorted() {
        let td = tempdir().expect("tempdir");
        let store = SessionStore::new(td.path().to_path_buf());
        let mut s1 = sample_session();
        s1.id = "bbbb".into();
        let mut s2 = sample_session();
        s2.id = "aaaa".into();
        store.save(&s1).unwrap();
        store.save(&s2).unwrap();

        assert_eq!(store.list_ids().unwrap(), vec!["aaaa", "bbbb"]);
    }

    #[test]
    fn delete_removes_file() {
        let td = tempdir().expect("tempdir");
        let store = SessionStore::new(td.path().to_path_buf());
        let session = sample_session();
        store.save(&session).unwrap();
        store.delete(&session.id).unwrap();
        assert!(store.load(&session.id).unwrap().is_none());
    }

    #[test]
    fn load_session_info_omits_repos() {
        let td = tempdir().expect("tempdir");
        let store = SessionStore::new(td.path().to_path_buf());
        let session = sample_session();
        store.save(&session).unwrap();

        let info = store
            .load_session_info(&session.id)
            .unwrap()
            .expect("present");
        assert_eq!(info.id, session.id);
        assert_eq!(info.provider, session.provider);
        assert_eq!(info.org, session.org);
    }

    #[test]
    fn cleanup_older_than_removes_stale_sessions_only() {
        let td = tempdir().expect("tempdir");
        let store = SessionStore::new(td.path().to_path_buf());
        let mut old = sample_session();
        old.id = "old-session".into();
        let mut fresh = sample_session();
        fresh.id = "fresh-session".into();
        store.save(&old).unwrap();
        store.save(&fresh).unwrap();

        let old_path = td.path().join("old-session.json");
        let stale_mtime = std::time::SystemTime::now() - Duration::from_secs(3600);
        filetime_touch(&old_path, stale_mtime);

        let removed = store.cleanup_older_than(Duration::from_secs(60)).unwrap();
        assert_eq!(removed, vec!["old-session".to_string()]);
        assert!(store.load("old-session").unwrap().is_none());
        assert!(store.load("fresh-session").unwrap().is_some());
    }

    /// Backdate a file's mtime without pulling in a filetime crate: reopen
    /// it and rely on `set_modified` from the standard library.
    fn filetime_touch(path: &Path, when: std::time::SystemTime) {
        let file = File::open(path).expect("open for touch");
        file.set_modified(when).expect("set_modified");
    }
}
