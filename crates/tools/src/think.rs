//! Scratchpad tool: lets the model plan without side effects.

use async_trait::async_trait;
use proto::{ParamSpec, ParamType, ToolResult};
use serde::Deserialize;

use crate::{Tool, parse_args};

#[derive(Debug, Deserialize)]
struct ThinkArgs {
    thought: String,
}

/// Records a reasoning step and echoes it back.
pub struct ThinkTool;

#[async_trait]
impl Tool for ThinkTool {
    fn name(&self) -> &str {
        "think"
    }

    fn description(&self) -> &str {
        "Think step by step about the plan to break down the task"
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::required(
            "thought",
            ParamType::String,
            "The reasoning step to record",
        )]
    }

    async fn execute(&self, call_id: &str, args: serde_json::Value) -> ToolResult {
        match parse_args::<ThinkArgs>(args) {
            Ok(a) => ToolResult::success(call_id, self.name(), format!("Thought recorded: {}", a.thought)),
            Err(e) => ToolResult::error(call_id, self.name(), e.to_string()),
        }
    }
}
