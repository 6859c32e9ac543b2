//! Advisory file locks and atomic file replacement.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use proto::StoreError;
use tracing::{debug, warn};

/// Default upper bound on waiting for a contended lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Exclusive advisory lock held on a companion `.lock` file.
///
/// Released when dropped. The lock file itself is left in place so that
/// every waiter contends on the same inode.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Acquires the lock, polling until `timeout` elapses.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;

        let started = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!(path = %path.display(), waited_ms = %started.elapsed().as_millis(), "Lock acquired");
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    if started.elapsed() >= timeout {
                        warn!(path = %path.display(), "Timed out waiting for lock");
                        return Err(StoreError::LockTimeout {
                            key: path.display().to_string(),
                            waited_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(StoreError::Io(e)),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "Failed to release lock");
        }
    }
}

/// Replaces `path` with `contents` via a temp file and rename.
///
/// Callers must hold the lock guarding `path`.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    {
        let mut file = File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(StoreError::Io(e));
    }
    Ok(())
}

/// Serializes `value` as pretty JSON and writes it atomically.
pub fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes =
        serde_json::to_vec_pretty(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
    write_atomic(path, &bytes)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Companion lock path: same base name, `.lock` suffix.
pub fn lock_path_for(path: &Path) -> PathBuf {
    path.with_extension("lock")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_times_out_while_another_handle_holds_it() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("case.lock");
        let held = FileLock::acquire(&path, DEFAULT_LOCK_TIMEOUT).expect("first lock");

        let err = FileLock::acquire(&path, Duration::from_millis(60)).expect_err("contended");
        assert!(matches!(err, StoreError::LockTimeout { .. }));

        drop(held);
        FileLock::acquire(&path, Duration::from_millis(60)).expect("lock after release");
    }

    #[test]
    fn lock_file_survives_release() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("case.lock");
        drop(FileLock::acquire(&path, DEFAULT_LOCK_TIMEOUT).expect("lock"));
        assert!(path.exists());
    }

    #[test]
    fn write_atomic_replaces_contents_without_leaving_temp_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("case.json");
        write_atomic(&path, b"first").expect("first write");
        write_atomic(&path, b"second").expect("second write");

        assert_eq!(fs::read_to_string(&path).expect("read"), "second");
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn lock_path_swaps_extension() {
        let path = Path::new("/tmp/sessions/case_1.json");
        assert_eq!(lock_path_for(path), PathBuf::from("/tmp/sessions/case_1.lock"));
    }
}
