//! Tool call, declaration, and result types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::ProtoError;

/// A tool invocation requested by the model.
///
/// `arguments` is kept as the raw JSON text the backend produced so that a
/// malformed payload can be reported back instead of silently dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Backend-assigned call id, echoed in the tool result message.
    pub id: String,
    /// Name of the tool to dispatch.
    pub name: String,
    /// Raw JSON argument text.
    pub arguments: String,
}

impl ToolCall {
    /// Creates a tool call with a fresh id.
    pub fn new(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: format!("call_{}", Uuid::new_v4().simple()),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Parses the raw arguments into a JSON object.
    ///
    /// Empty or whitespace-only text yields an empty object.
    pub fn parse_arguments(&self) -> Result<Map<String, Value>, ProtoError> {
        let raw = self.arguments.trim();
        if raw.is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(ProtoError::ArgumentParse(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
            Err(e) => Err(ProtoError::ArgumentParse(e.to_string())),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// JSON type of a declared tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
}

impl ParamType {
    fn as_str(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
        }
    }
}

/// One declared tool parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamType,
    pub description: String,
    pub required: bool,
}

impl ParamSpec {
    /// Declares a required parameter.
    pub fn required(name: impl Into<String>, kind: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            required: true,
        }
    }

    /// Declares an optional parameter.
    pub fn optional(name: impl Into<String>, kind: ParamType, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }
}

/// Tool declaration offered to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description used by the model for tool selection.
    pub description: String,
    /// Parameters in declaration order.
    pub parameters: Vec<ParamSpec>,
}

impl ToolDefinition {
    /// Creates a tool definition from its declared parameters.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Vec<ParamSpec>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Renders the function-calling JSON schema for this tool.
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in &self.parameters {
            properties.insert(
                param.name.clone(),
                serde_json::json!({
                    "type": param.kind.as_str(),
                    "description": param.description,
                }),
            );
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// Payload returned by a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolOutput {
    /// Plain text result.
    Text(String),
    /// Structured result.
    Json(Value),
}

impl ToolOutput {
    /// Builds the error-shaped payload `{"error": message}`.
    pub fn error(message: impl Into<String>) -> Self {
        ToolOutput::Json(serde_json::json!({ "error": message.into() }))
    }

    /// True when the payload is a JSON object carrying an `error` key.
    pub fn is_error(&self) -> bool {
        matches!(self, ToolOutput::Json(Value::Object(map)) if map.contains_key("error"))
    }

    /// Returns the error message for error-shaped payloads.
    pub fn error_message(&self) -> Option<String> {
        match self {
            ToolOutput::Json(Value::Object(map)) => map.get("error").map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
            _ => None,
        }
    }

    /// Renders the payload as the content of a tool message.
    pub fn render(&self) -> String {
        match self {
            ToolOutput::Text(text) => text.clone(),
            ToolOutput::Json(value) => value.to_string(),
        }
    }

    /// Converts the payload into a JSON value for trajectory records.
    pub fn to_value(&self) -> Value {
        match self {
            ToolOutput::Text(text) => Value::String(text.clone()),
            ToolOutput::Json(value) => value.clone(),
        }
    }
}

impl From<String> for ToolOutput {
    fn from(s: String) -> Self {
        ToolOutput::Text(s)
    }
}

impl From<&str> for ToolOutput {
    fn from(s: &str) -> Self {
        ToolOutput::Text(s.to_string())
    }
}

/// Result of a single tool dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Id of the call this result answers.
    pub call_id: String,
    /// Name of the tool that produced it.
    pub tool_name: String,
    /// Tool payload.
    pub output: ToolOutput,
}

impl ToolResult {
    /// Creates a text result.
    pub fn success(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            output: ToolOutput::Text(output.into()),
        }
    }

    /// Creates a structured result.
    pub fn json(call_id: impl Into<String>, tool_name: impl Into<String>, value: Value) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            output: ToolOutput::Json(value),
        }
    }

    /// Creates an error-shaped result.
    pub fn error(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            output: ToolOutput::error(message),
        }
    }

    pub fn is_error(&self) -> bool {
        self.output.is_error()
    }
}
