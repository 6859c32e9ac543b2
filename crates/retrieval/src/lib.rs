//! Keyword retrieval over JSON record collections.
//!
//! [`Bm25Index`] ranks records for a free-text query; [`RetrievalSession`]
//! accumulates unique hits across the turns of one conversation.

pub mod index;
pub mod session;

pub use index::{B, Bm25Index, IndexFields, K1, SearchHit, tokenize};
pub use session::{DEFAULT_CAPACITY, RetrievalSession};
