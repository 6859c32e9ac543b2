//! Shared JSON-array collections: the experience file and the conversation log.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use proto::{ConversationRecord, ExperienceRecord, NewExperience, StoreError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::lock::{DEFAULT_LOCK_TIMEOUT, FileLock, lock_path_for, write_json_atomic};

/// Reads a JSON array; a missing, empty or malformed file reads as empty.
fn read_lenient<T: DeserializeOwned>(path: &Path) -> Vec<T> {
    match read_strict(path) {
        Ok(records) => records,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable record file");
            Vec::new()
        }
    }
}

/// Reads a JSON array; only a missing or empty file reads as empty.
fn read_strict<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    match fs::read_to_string(path) {
        Ok(content) if content.trim().is_empty() => Ok(Vec::new()),
        Ok(content) => {
            serde_json::from_str(&content).map_err(|e| StoreError::Serialization(e.to_string()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(StoreError::Io(e)),
    }
}

/// Appends one record built from the current contents, under the file lock.
///
/// A malformed existing file is an error rather than silently replaced.
fn append_locked<T, F>(path: &Path, timeout: Duration, build: F) -> Result<T, StoreError>
where
    T: Serialize + DeserializeOwned + Clone,
    F: FnOnce(&[T]) -> T,
{
    let _lock = FileLock::acquire(&lock_path_for(path), timeout)?;
    let mut records: Vec<T> = read_strict(path)?;
    let record = build(&records);
    records.push(record.clone());
    write_json_atomic(path, &records)?;
    debug!(path = %path.display(), count = records.len(), "Record appended");
    Ok(record)
}

/// Append-only collection of experience records.
#[derive(Debug, Clone)]
pub struct ExperienceStore {
    path: PathBuf,
    lock_timeout: Duration,
}

impl ExperienceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All stored experiences; missing or malformed storage reads as empty.
    pub fn load_all(&self) -> Vec<ExperienceRecord> {
        read_lenient(&self.path)
    }

    /// Looks up an experience by id.
    pub fn get(&self, id: i64) -> Option<ExperienceRecord> {
        self.load_all().into_iter().find(|r| r.id == id)
    }

    /// Appends an experience with `id = max(existing) + 1`.
    pub fn append(&self, experience: NewExperience) -> Result<ExperienceRecord, StoreError> {
        append_locked(&self.path, self.lock_timeout, |existing: &[ExperienceRecord]| {
            let id = existing.iter().map(|r| r.id).max().unwrap_or(0) + 1;
            ExperienceRecord {
                id,
                case_id: experience.case_id,
                situation: experience.situation,
                uncertainty: experience.uncertainty,
                action: experience.action,
                rationale: experience.rationale,
                timestamp: Utc::now().to_rfc3339(),
            }
        })
    }
}

/// Log of successful episodes: query, optional image, final response.
#[derive(Debug, Clone)]
pub struct ConversationLog {
    path: PathBuf,
    lock_timeout: Duration,
}

impl ConversationLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load_all(&self) -> Vec<ConversationRecord> {
        read_lenient(&self.path)
    }

    pub fn append(
        &self,
        user_query: &str,
        image_path: Option<&str>,
        final_response: Value,
    ) -> Result<ConversationRecord, StoreError> {
        append_locked(&self.path, self.lock_timeout, |existing: &[ConversationRecord]| {
            ConversationRecord {
                id: existing.len() as u64 + 1,
                timestamp: Utc::now().to_rfc3339(),
                user_query: user_query.to_string(),
                image_path: image_path.map(str::to_string),
                final_response,
            }
        })
    }
}
