//! Per-episode trajectory and conversation-log records.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Input/output token totals for one episode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTotals {
    pub input: u64,
    pub output: u64,
}

impl TokenTotals {
    pub fn add(&mut self, input: u64, output: u64) {
        self.input += input;
        self.output += output;
    }

    pub fn total(&self) -> u64 {
        self.input + self.output
    }
}

/// One recorded turn of an episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub agent_type: String,
    /// Assistant text emitted alongside (or instead of) tool calls.
    pub thinking_process: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    /// Only kept for tools configured as verbose.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// Full record of one episode, written once at finalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub agent: String,
    pub episode_id: String,
    pub input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub turns: Vec<TurnRecord>,
    pub total_tokens: TokenTotals,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl Trajectory {
    pub fn new(agent: impl Into<String>, episode_id: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            episode_id: episode_id.into(),
            input: input.into(),
            image_url: None,
            turns: Vec::new(),
            total_tokens: TokenTotals::default(),
            result: None,
        }
    }
}

/// One entry of the shared conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: u64,
    pub timestamp: String,
    pub user_query: String,
    #[serde(default)]
    pub image_path: Option<String>,
    pub final_response: Value,
}
