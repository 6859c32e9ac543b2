//! Chat-backed diagnosis synthesis for `final_diagnosis_documented`.

use std::sync::Arc;

use async_trait::async_trait;
use proto::ToolError;
use tools::{DiagnosisSynthesizer, synthesis_prompt};
use tracing::debug;

use crate::llm::{ChatMessage, ChatRequest, LlmProvider, ToolChoice};

const SYNTHESIS_SYSTEM_PROMPT: &str =
    "You are a medical expert providing concise final diagnoses. Output only the diagnosis name, nothing else.";
const SYNTHESIS_TEMPERATURE: f32 = 0.1;

pub struct LlmSynthesizer {
    llm: Arc<dyn LlmProvider>,
    model: String,
}

impl LlmSynthesizer {
    pub fn new(llm: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }
}

#[async_trait]
impl DiagnosisSynthesizer for LlmSynthesizer {
    async fn synthesize(&self, findings: &[String], assessment: &str) -> Result<String, ToolError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(SYNTHESIS_SYSTEM_PROMPT),
                ChatMessage::user(synthesis_prompt(findings, assessment)),
            ],
            tools: Vec::new(),
            temperature: SYNTHESIS_TEMPERATURE,
            tool_choice: ToolChoice::Auto,
        };
        let response = self
            .llm
            .chat(request)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("Diagnosis synthesis failed: {e}")))?;
        let text = response.content.unwrap_or_default().trim().to_string();
        debug!(findings = findings.len(), diagnosis = %text, "Diagnosis synthesized");
        if text.is_empty() {
            return Err(ToolError::ExecutionFailed(
                "Diagnosis synthesis returned no text".to_string(),
            ));
        }
        Ok(text)
    }
}
