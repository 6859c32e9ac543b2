//! Tool trait and built-in tool implementations.
//!
//! The agent runtime dispatches model tool calls through this crate:
//! shell and web utilities, answer/report terminals, the experience
//! collection, and the session-backed diagnosis documentation tools.

pub mod answer;
pub mod bash;
pub mod diagnosis;
pub mod documentation;
pub mod experience;
pub mod search;
pub mod think;

pub use answer::{CompleteAnalysisTool, FinalAnswerTool, FinalResultTool};
pub use bash::BashTool;
pub use diagnosis::{DiagnosisStepTool, FinalDiagnosisTool};
pub use documentation::{
    DiagnosisSynthesizer, DocumentStepTool, FinalDiagnosisDocumentedTool, QueryGuidelinesTool,
    guideline_fields, synthesis_prompt,
};
pub use experience::{SaveExperienceTool, SelectExperiencesTool, experience_fields};
pub use search::BraveSearchTool;
pub use think::ThinkTool;

use async_trait::async_trait;
use proto::{ParamSpec, SessionId, StoreError, ToolDefinition, ToolError, ToolResult};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Trait that all tools must implement
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name exposed to the LLM.
    fn name(&self) -> &str;
    /// Human-readable description for tool selection.
    fn description(&self) -> &str;
    /// Declared parameters, in the order they are presented to the model.
    fn parameters(&self) -> Vec<ParamSpec>;
    /// Executes the tool with the given call id and JSON args.
    async fn execute(&self, call_id: &str, args: Value) -> ToolResult;

    /// Declaration offered to the model.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description(), self.parameters())
    }
}

/// Deserializes tool arguments into a typed struct.
pub(crate) fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArgs(e.to_string()))
}

/// Session bound to the running episode.
pub(crate) fn require_session() -> Result<SessionId, ToolError> {
    store::current_session().ok_or(ToolError::NoActiveSession)
}

/// Runs a blocking store operation off the async workers.
pub(crate) async fn run_blocking<T, F>(op: F) -> Result<T, ToolError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?
        .map_err(ToolError::from)
}
