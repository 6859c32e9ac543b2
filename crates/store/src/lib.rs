//! File-backed session state, experience collection, and conversation log.
//!
//! All writers take an exclusive advisory lock on a companion `.lock` file
//! and replace the data file atomically, so concurrent episodes on one host
//! never interleave partial writes. APIs are synchronous; async callers run
//! them on the blocking pool.

pub mod context;
pub mod lock;
pub mod records;
pub mod session;

pub use context::{current_session, sync_with_session, with_session};
pub use lock::{DEFAULT_LOCK_TIMEOUT, FileLock};
pub use records::{ConversationLog, ExperienceStore};
pub use session::{SessionStore, sanitize_key};
