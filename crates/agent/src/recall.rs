//! Experience recall: accumulates relevant past experiences over a
//! conversation and lets a selector agent pick the ones worth showing.

use std::fmt::Write as _;
use std::sync::Arc;

use dashmap::DashMap;
use retrieval::{Bm25Index, DEFAULT_CAPACITY, RetrievalSession, SearchHit};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::runtime::{AgentRuntime, RunOptions};

/// Turns shorter than this are not used as queries.
const MIN_QUERY_CHARS: usize = 10;
const RECALL_TOP_K: usize = 5;
/// Speakers whose turns carry new clinical facts.
const QUERY_SPEAKERS: [&str; 2] = ["patient", "measurement"];

/// One line of the conversation being recalled for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueTurn {
    pub speaker: String,
    pub content: String,
}

impl DialogueTurn {
    pub fn new(speaker: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            content: content.into(),
        }
    }

    fn is_query(&self) -> bool {
        QUERY_SPEAKERS.contains(&self.speaker.to_ascii_lowercase().as_str())
            && self.content.chars().count() > MIN_QUERY_CHARS
    }
}

/// Per-conversation state. `recalls` counts selector runs and survives
/// `clear`, so every run gets its own episode id.
struct Conversation {
    hits: RetrievalSession,
    recalls: u64,
}

pub struct ExperienceRecall {
    index: Arc<Bm25Index>,
    selector: Arc<AgentRuntime>,
    capacity: usize,
    sessions: DashMap<String, Conversation>,
}

impl ExperienceRecall {
    pub fn new(index: Arc<Bm25Index>, selector: Arc<AgentRuntime>) -> Self {
        Self::with_capacity(index, selector, DEFAULT_CAPACITY)
    }

    /// Holds at most `capacity` experiences per conversation.
    pub fn with_capacity(index: Arc<Bm25Index>, selector: Arc<AgentRuntime>, capacity: usize) -> Self {
        Self {
            index,
            selector,
            capacity,
            sessions: DashMap::new(),
        }
    }

    /// Returns the selector's `context_for_doctor`, or an empty string when
    /// nothing relevant was found or the selector did not pick anything.
    pub async fn recall(&self, session_id: &str, history: &[DialogueTurn]) -> String {
        let (hits, recall_no) = self.accumulate(session_id, history);
        if hits.is_empty() {
            debug!(session = %session_id, "No experiences accumulated");
            return String::new();
        }

        let prompt = render_prompt(history, &hits);
        let outcome = self
            .selector
            .run(
                &prompt,
                RunOptions::default().with_episode_id(format!("memory_{session_id}_{recall_no}")),
            )
            .await;
        if outcome.is_error() {
            debug!(session = %session_id, "Selector finished without a selection");
            return String::new();
        }

        let context = outcome.result.to_value()["context_for_doctor"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        info!(session = %session_id, candidates = hits.len(), chars = context.len(), "Experience recall done");
        context
    }

    /// Forgets everything accumulated for `session_id`.
    pub fn clear(&self, session_id: &str) {
        if let Some(mut conversation) = self.sessions.get_mut(session_id) {
            conversation.hits.clear();
        }
    }

    /// Number of experiences held for `session_id`.
    pub fn held(&self, session_id: &str) -> usize {
        self.sessions.get(session_id).map_or(0, |c| c.hits.len())
    }

    /// Adds hits for the query turns and returns everything held, along with
    /// the 1-based number of this recall for the conversation.
    fn accumulate(&self, session_id: &str, history: &[DialogueTurn]) -> (Vec<SearchHit>, u64) {
        let mut conversation = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Conversation {
                hits: RetrievalSession::with_capacity(session_id, Arc::clone(&self.index), self.capacity),
                recalls: 0,
            });
        for turn in history.iter().filter(|t| t.is_query()) {
            conversation.hits.search_and_add(&turn.content, RECALL_TOP_K);
        }
        conversation.recalls += 1;
        (conversation.hits.get_results(), conversation.recalls)
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn render_prompt(history: &[DialogueTurn], hits: &[SearchHit]) -> String {
    let mut out = String::from("## Conversation History:\n");
    for turn in history {
        let _ = writeln!(out, "{}: {}", capitalize(&turn.speaker), turn.content);
    }
    out.push_str("\n## Retrieved Experiences (id, observation):\n");
    for hit in hits {
        let _ = writeln!(out, "ID: {} | Observation: {}", hit.id, hit.text);
    }
    out
}
