//! File-backed diagnostic session store.
//!
//! One JSON file per session under the store directory, plus a companion
//! `.lock` file used for exclusive read-modify-write cycles.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use proto::{NextAction, Session, SessionId, StepDraft, StoreError, Uncertainties};
use tracing::{debug, info};

use crate::lock::{DEFAULT_LOCK_TIMEOUT, FileLock, lock_path_for, write_json_atomic};

/// Keeps only ASCII alphanumerics, `_` and `-`.
pub fn sanitize_key(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Session store rooted at a directory.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
    lock_timeout: Duration,
}

impl SessionStore {
    /// Opens a store, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        })
    }

    /// Overrides the maximum wait for a contended session lock.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the session file for `session_id`.
    pub fn session_path(&self, session_id: &SessionId) -> Result<PathBuf, StoreError> {
        let key = sanitize_key(session_id.as_str());
        if key.is_empty() {
            return Err(StoreError::InvalidSessionId(session_id.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }

    /// Loads a session, returning an empty skeleton when none is stored.
    pub fn load(&self, session_id: &SessionId) -> Result<Session, StoreError> {
        let path = self.session_path(session_id)?;
        read_session(&path, session_id)
    }

    /// Overwrites the stored session.
    pub fn save(&self, session: &Session) -> Result<(), StoreError> {
        let path = self.session_path(&session.session_id)?;
        let _lock = FileLock::acquire(&lock_path_for(&path), self.lock_timeout)?;
        write_json_atomic(&path, session)
    }

    /// Appends a step with the three mandatory fields.
    pub fn append_step(
        &self,
        session_id: &SessionId,
        new_information: impl Into<String>,
        uncertainties: Uncertainties,
        next_action: NextAction,
    ) -> Result<Session, StoreError> {
        self.append(
            session_id,
            StepDraft::new(new_information, uncertainties, next_action),
        )
    }

    /// Appends a step under the session's exclusive lock.
    ///
    /// The read, numbering, note concatenation and write happen while the
    /// lock is held; the lock is released on every return path.
    pub fn append(&self, session_id: &SessionId, draft: StepDraft) -> Result<Session, StoreError> {
        self.update(session_id, |session| {
            session.push_step(draft);
        })
    }

    /// Appends the terminal step and records the final diagnosis.
    pub fn record_final_diagnosis(
        &self,
        session_id: &SessionId,
        diagnosis: &str,
        reason: &str,
    ) -> Result<Session, StoreError> {
        let draft = StepDraft::new(
            format!("Final diagnosis: {diagnosis}"),
            Uncertainties::Rationale(Default::default()),
            NextAction::DiagnosisReady(None),
        )
        .with_reference_relevance("N/A - Final diagnosis")
        .with_action_reason(reason)
        .with_final_diagnosis(diagnosis);
        let session = self.append(session_id, draft)?;
        info!(session = %session_id, diagnosis = %diagnosis, "Final diagnosis recorded");
        Ok(session)
    }

    fn update(
        &self,
        session_id: &SessionId,
        apply: impl FnOnce(&mut Session),
    ) -> Result<Session, StoreError> {
        let path = self.session_path(session_id)?;
        let _lock = FileLock::acquire(&lock_path_for(&path), self.lock_timeout)?;

        let mut session = read_session(&path, session_id)?;
        apply(&mut session);
        write_json_atomic(&path, &session)?;
        debug!(session = %session_id, steps = session.steps.len(), "Session updated");
        Ok(session)
    }

    /// Deletes the session file. Returns whether one existed.
    ///
    /// The lock file stays, so waiters and later callers share one inode.
    pub fn clear(&self, session_id: &SessionId) -> Result<bool, StoreError> {
        let path = self.session_path(session_id)?;
        let existed = {
            let _lock = FileLock::acquire(&lock_path_for(&path), self.lock_timeout)?;
            remove_if_exists(&path)?
        };
        if existed {
            info!(session = %session_id, "Session cleared");
        }
        Ok(existed)
    }

    pub fn accumulated_notes(&self, session_id: &SessionId) -> Result<String, StoreError> {
        Ok(self.load(session_id)?.accumulated_notes)
    }

    pub fn all_new_information(&self, session_id: &SessionId) -> Result<Vec<String>, StoreError> {
        Ok(self.load(session_id)?.new_information())
    }

    /// Response implied by the latest recorded step.
    pub fn latest_response(&self, session_id: &SessionId) -> Result<Option<String>, StoreError> {
        Ok(self.load(session_id)?.latest_response())
    }
}

fn read_session(path: &Path, session_id: &SessionId) -> Result<Session, StoreError> {
    match fs::read_to_string(path) {
        Ok(content) if content.trim().is_empty() => Ok(Session::empty(session_id.clone())),
        Ok(content) => {
            serde_json::from_str(&content).map_err(|e| StoreError::Serialization(e.to_string()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Session::empty(session_id.clone())),
        Err(e) => Err(StoreError::Io(e)),
    }
}

fn remove_if_exists(path: &Path) -> Result<bool, StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StoreError::Io(e)),
    }
}
