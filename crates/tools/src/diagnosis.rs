//! Session-backed diagnosis tools for the uncertainty-aware doctor.

use std::sync::Arc;

use async_trait::async_trait;
use proto::{NextAction, ParamSpec, ParamType, StepDraft, ToolError, ToolResult, Uncertainties};
use serde::Deserialize;
use store::SessionStore;
use tracing::debug;

use crate::{Tool, parse_args, require_session, run_blocking};

#[derive(Debug, Deserialize)]
struct StepArgs {
    #[serde(default)]
    new_information: String,
    #[serde(default)]
    current_uncertainties: String,
    next_step_action: String,
}

/// Records one reasoning step and hands back what to say next.
pub struct DiagnosisStepTool {
    sessions: Arc<SessionStore>,
}

impl DiagnosisStepTool {
    pub fn new(sessions: Arc<SessionStore>) -> Self {
        Self { sessions }
    }

    async fn run(&self, args: StepArgs) -> Result<String, ToolError> {
        let next_action: NextAction = args
            .next_step_action
            .parse()
            .map_err(|e: proto::ProtoError| ToolError::InvalidArgs(e.to_string()))?;
        let session_id = require_session()?;
        let draft = StepDraft::new(
            args.new_information,
            Uncertainties::from_list_text(&args.current_uncertainties),
            next_action.clone(),
        );

        let sessions = Arc::clone(&self.sessions);
        let session = run_blocking(move || sessions.append(&session_id, draft)).await?;
        debug!(session = %session.session_id, steps = session.steps.len(), "Diagnosis step recorded");
        Ok(next_action.utterance())
    }
}

#[async_trait]
impl Tool for DiagnosisStepTool {
    fn name(&self) -> &str {
        "diagnosis_step"
    }

    fn description(&self) -> &str {
        "Record a diagnostic reasoning step: what was just learned, the current \
         differential, and the next action. Returns the text to say next."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required(
                "new_information",
                ParamType::String,
                "New findings from the latest patient answer or test result",
            ),
            ParamSpec::required(
                "current_uncertainties",
                ParamType::String,
                "Diseases still under consideration (comma-separated)",
            ),
            ParamSpec::required(
                "next_step_action",
                ParamType::String,
                "Next action: 'ASK PATIENT: ...', 'PHYSICAL EXAM: ...', 'REQUEST TEST: ...' or 'REQUEST IMAGE: ...'",
            ),
        ]
    }

    async fn execute(&self, call_id: &str, args: serde_json::Value) -> ToolResult {
        let result = match parse_args::<StepArgs>(args) {
            Ok(a) => self.run(a).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(text) => ToolResult::success(call_id, self.name(), text),
            Err(e) => ToolResult::error(call_id, self.name(), e.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FinalArgs {
    #[serde(default)]
    reason_ready: String,
    #[serde(default)]
    uncertainties_resolved: String,
    final_diagnosis_text: String,
}

/// Records the terminal step with an explicit diagnosis.
pub struct FinalDiagnosisTool {
    sessions: Arc<SessionStore>,
}

impl FinalDiagnosisTool {
    pub fn new(sessions: Arc<SessionStore>) -> Self {
        Self { sessions }
    }

    async fn run(&self, args: FinalArgs) -> Result<String, ToolError> {
        let diagnosis = args.final_diagnosis_text.trim().to_string();
        if diagnosis.is_empty() {
            return Err(ToolError::InvalidArgs(
                "final_diagnosis_text must not be empty".to_string(),
            ));
        }
        let session_id = require_session()?;
        let reason = match args.uncertainties_resolved.trim() {
            "" => args.reason_ready,
            resolved => format!("{} (resolved: {resolved})", args.reason_ready),
        };

        let sessions = Arc::clone(&self.sessions);
        let recorded = diagnosis.clone();
        run_blocking(move || sessions.record_final_diagnosis(&session_id, &recorded, &reason))
            .await?;
        Ok(format!("DIAGNOSIS READY: {diagnosis}"))
    }
}

#[async_trait]
impl Tool for FinalDiagnosisTool {
    fn name(&self) -> &str {
        "final_diagnosis"
    }

    fn description(&self) -> &str {
        "Submit the final diagnosis once the differential has been narrowed to one disease."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required(
                "reason_ready",
                ParamType::String,
                "Why the evidence is sufficient to conclude",
            ),
            ParamSpec::required(
                "uncertainties_resolved",
                ParamType::String,
                "How the remaining alternatives were ruled out",
            ),
            ParamSpec::required(
                "final_diagnosis_text",
                ParamType::String,
                "The diagnosis name",
            ),
        ]
    }

    async fn execute(&self, call_id: &str, args: serde_json::Value) -> ToolResult {
        let result = match parse_args::<FinalArgs>(args) {
            Ok(a) => self.run(a).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(text) => ToolResult::success(call_id, self.name(), text),
            Err(e) => ToolResult::error(call_id, self.name(), e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proto::SessionId;
    use serde_json::json;

    fn open_store() -> (tempfile::TempDir, Arc<SessionStore>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path().join("sessions")).expect("store");
        (dir, Arc::new(store))
    }

    #[tokio::test]
    async fn step_without_bound_session_is_error_shaped() {
        let (_dir, store) = open_store();
        let result = DiagnosisStepTool::new(store)
            .execute(
                "c1",
                json!({
                    "new_information": "cough",
                    "current_uncertainties": "asthma",
                    "next_step_action": "ASK PATIENT: Any wheeze?"
                }),
            )
            .await;
        assert!(result.is_error());
        assert_eq!(
            result.output.error_message().as_deref(),
            Some("No active diagnosis session")
        );
    }

    #[tokio::test]
    async fn step_records_and_returns_bare_question() {
        let (_dir, store) = open_store();
        let tool = DiagnosisStepTool::new(Arc::clone(&store));
        let id = SessionId::from("step-case");
        let result = store::with_session(
            id.clone(),
            tool.execute(
                "c2",
                json!({
                    "new_information": "productive cough for 2 weeks",
                    "current_uncertainties": "pneumonia, bronchitis",
                    "next_step_action": "ASK PATIENT: Do you have a fever?"
                }),
            ),
        )
        .await;

        assert_eq!(result.output.render(), "Do you have a fever?");
        let session = store.load(&id).expect("load");
        assert_eq!(session.steps.len(), 1);
        assert_eq!(
            session.current_uncertainties.hypotheses(),
            vec!["pneumonia", "bronchitis"]
        );
    }

    #[tokio::test]
    async fn step_rejects_untagged_action_without_writing() {
        let (_dir, store) = open_store();
        let tool = DiagnosisStepTool::new(Arc::clone(&store));
        let id = SessionId::from("bad-action");
        let result = store::with_session(
            id.clone(),
            tool.execute(
                "c3",
                json!({"new_information": "x", "current_uncertainties": "y", "next_step_action": "order labs"}),
            ),
        )
        .await;
        assert!(result.is_error());
        assert!(store.load(&id).expect("load").steps.is_empty());
    }

    #[tokio::test]
    async fn final_diagnosis_records_terminal_step() {
        let (_dir, store) = open_store();
        let tool = FinalDiagnosisTool::new(Arc::clone(&store));
        let id = SessionId::from("final-case");
        let result = store::with_session(
            id.clone(),
            tool.execute(
                "c4",
                json!({
                    "reason_ready": "Classic presentation",
                    "uncertainties_resolved": "Septic arthritis excluded",
                    "final_diagnosis_text": " Gout "
                }),
            ),
        )
        .await;

        assert_eq!(result.output.render(), "DIAGNOSIS READY: Gout");
        let session = store.load(&id).expect("load");
        assert_eq!(session.final_diagnosis.as_deref(), Some("Gout"));
        assert!(session.is_concluded());
    }
}
