//! Per-conversation accumulator of unique search hits.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::index::{Bm25Index, SearchHit};

/// Default number of hits a conversation may accumulate.
pub const DEFAULT_CAPACITY: usize = 30;

/// Hits gathered over the course of one conversation.
///
/// Never holds the same id twice and never grows past its capacity.
#[derive(Debug)]
pub struct RetrievalSession {
    session_id: String,
    index: Arc<Bm25Index>,
    capacity: usize,
    results: HashMap<i64, SearchHit>,
}

impl RetrievalSession {
    pub fn new(session_id: impl Into<String>, index: Arc<Bm25Index>) -> Self {
        Self::with_capacity(session_id, index, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(session_id: impl Into<String>, index: Arc<Bm25Index>, capacity: usize) -> Self {
        Self {
            session_id: session_id.into(),
            index,
            capacity,
            results: HashMap::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn index(&self) -> &Arc<Bm25Index> {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Searches and keeps hits not already held, up to capacity.
    ///
    /// Returns only the newly added hits, in rank order.
    pub fn search_and_add(&mut self, query: &str, top_k: usize) -> Vec<SearchHit> {
        let mut added = Vec::new();
        for hit in self.index.search(query, top_k) {
            if self.results.len() >= self.capacity {
                break;
            }
            if self.results.contains_key(&hit.id) {
                continue;
            }
            self.results.insert(hit.id, hit.clone());
            added.push(hit);
        }
        debug!(
            session = %self.session_id,
            added = added.len(),
            held = self.results.len(),
            "Retrieval session updated"
        );
        added
    }

    /// All held hits, best score first; ties by ascending id.
    pub fn get_results(&self) -> Vec<SearchHit> {
        let mut hits: Vec<SearchHit> = self.results.values().cloned().collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
        hits
    }

    pub fn clear(&mut self) {
        self.results.clear();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::index::IndexFields;

    fn index_of(n: usize) -> Arc<Bm25Index> {
        let records = (0..n)
            .map(|i| json!({"id": i as i64 + 1, "observation": format!("headache case {i}")}))
            .collect();
        Arc::new(Bm25Index::from_records(records, IndexFields::default()))
    }

    #[test]
    fn repeated_queries_do_not_duplicate_hits() {
        let mut session = RetrievalSession::new("conv-1", index_of(5));
        let first = session.search_and_add("headache", 3);
        assert_eq!(first.len(), 3);

        let again = session.search_and_add("headache", 3);
        assert!(again.is_empty());

        let wider = session.search_and_add("headache", 10);
        assert_eq!(wider.len(), 2);
        assert_eq!(session.len(), 5);

        let mut ids: Vec<i64> = session.get_results().iter().map(|h| h.id).collect();
        ids.dedup();
        assert_eq!(ids.len(), 5);
    }

    #[test]
    fn capacity_bounds_accumulated_hits() {
        let mut session = RetrievalSession::with_capacity("conv-2", index_of(10), 4);
        assert_eq!(session.search_and_add("headache", 3).len(), 3);
        assert_eq!(session.search_and_add("headache", 10).len(), 1);
        assert_eq!(session.search_and_add("headache", 10).len(), 0);
        assert_eq!(session.len(), 4);
    }

    #[test]
    fn default_capacity_is_thirty() {
        let mut session = RetrievalSession::new("conv-3", index_of(40));
        session.search_and_add("headache", 40);
        assert_eq!(session.len(), DEFAULT_CAPACITY);
    }

    #[test]
    fn results_sorted_by_score_then_id() {
        let index = Arc::new(Bm25Index::from_records(
            vec![
                json!({"id": 9, "observation": "cough"}),
                json!({"id": 4, "observation": "cough"}),
                json!({"id": 7, "observation": "cough cough wheeze and more words here"}),
            ],
            IndexFields::default(),
        ));
        let mut session = RetrievalSession::new("conv-4", index);
        session.search_and_add("wheeze", 5);
        session.search_and_add("cough", 5);

        let results = session.get_results();
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
        let tied: Vec<i64> = results
            .iter()
            .filter(|h| h.text == "cough")
            .map(|h| h.id)
            .collect();
        assert_eq!(tied, vec![4, 9]);
    }

    #[test]
    fn clear_empties_the_session() {
        let mut session = RetrievalSession::new("conv-5", index_of(3));
        session.search_and_add("headache", 3);
        session.clear();
        assert!(session.is_empty());
        assert_eq!(session.search_and_add("headache", 3).len(), 3);
    }
}
