//! Shared protocol types for the agent runtime, session store, and tools.
//!
//! This crate defines serializable tool/session/trajectory structures and
//! strongly-typed error enums shared across the workspace.

pub mod error;
pub mod message;
pub mod session;
pub mod tool;
pub mod trajectory;

/// Re-export of all protocol error types.
pub use error::*;
/// Re-export of conversation identity types.
pub use message::{Role, SessionId};
/// Re-export of diagnostic session records.
pub use session::{ExperienceRecord, NewExperience, NextAction, Session, Step, StepDraft, Uncertainties};
/// Re-export of tool call definition and result types.
pub use tool::{ParamSpec, ParamType, ToolCall, ToolDefinition, ToolOutput, ToolResult};
/// Re-export of episode trajectory records.
pub use trajectory::{ConversationRecord, TokenTotals, Trajectory, TurnRecord};
