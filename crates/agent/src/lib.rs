//! Agent runtime, experience recall, and LLM adapter interfaces.

pub mod llm;
pub mod profile;
pub mod recall;
pub mod runtime;
pub mod synthesizer;
pub mod tool_registry;

/// Chat request/response models and provider interfaces.
pub use llm::{ChatMessage, ChatRequest, ChatResponse, LlmProvider, OpenAiProvider, TokenUsage, ToolChoice};
/// Per-agent model, prompt and tool settings.
pub use profile::AgentProfile;
/// Per-conversation experience recall.
pub use recall::{DialogueTurn, ExperienceRecall};
/// Main runtime orchestration loop.
pub use runtime::{AgentRuntime, EpisodeOutcome, EpisodeState, OutcomeKind, RunOptions};
/// Chat-backed diagnosis synthesis.
pub use synthesizer::LlmSynthesizer;
/// Runtime tool registry.
pub use tool_registry::ToolRegistry;
