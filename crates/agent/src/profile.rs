//! Per-agent settings: model, prompt, tool set and turn budget.

use serde::{Deserialize, Serialize};

pub const DEFAULT_TEMPERATURE: f32 = 0.3;
pub const DEFAULT_MAX_TURNS: usize = 10;

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_max_turns() -> usize {
    DEFAULT_MAX_TURNS
}

fn default_verbose_tools() -> Vec<String> {
    vec!["brave_search".to_string()]
}

/// Static configuration of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Name used in logs and trajectory file names.
    #[serde(default)]
    pub name: String,
    /// Model id; empty means the `[llm]` default.
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    /// Tools offered to the model, in this order.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Tools whose successful result ends the episode.
    #[serde(default)]
    pub terminal_tools: Vec<String>,
    /// Tools whose results are kept in the trajectory.
    #[serde(default = "default_verbose_tools")]
    pub verbose_tools: Vec<String>,
}

impl AgentProfile {
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: String::new(),
            system_prompt: system_prompt.into(),
            temperature: DEFAULT_TEMPERATURE,
            max_turns: DEFAULT_MAX_TURNS,
            tools: Vec::new(),
            terminal_tools: Vec::new(),
            verbose_tools: default_verbose_tools(),
        }
    }

    pub fn with_tools<S: Into<String>>(mut self, tools: impl IntoIterator<Item = S>) -> Self {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_terminal_tools<S: Into<String>>(mut self, tools: impl IntoIterator<Item = S>) -> Self {
        self.terminal_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn is_terminal(&self, tool: &str) -> bool {
        self.terminal_tools.iter().any(|t| t == tool)
    }

    pub fn is_verbose(&self, tool: &str) -> bool {
        self.verbose_tools.iter().any(|t| t == tool)
    }
}
