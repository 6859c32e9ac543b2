//! Structured documentation tools: per-step records, guideline lookup and
//! the synthesized final diagnosis.

use std::sync::Arc;

use async_trait::async_trait;
use proto::{NextAction, ParamSpec, ParamType, StepDraft, ToolError, ToolResult, Uncertainties};
use retrieval::{Bm25Index, IndexFields};
use serde::Deserialize;
use serde_json::Value;
use store::SessionStore;
use tracing::{debug, info};

use crate::{Tool, parse_args, require_session, run_blocking};

const GUIDELINE_TOP_K: usize = 5;

/// Produces a diagnosis name from documented findings.
///
/// Implemented by the agent crate over the chat backend; tests substitute
/// a canned answer.
#[async_trait]
pub trait DiagnosisSynthesizer: Send + Sync {
    async fn synthesize(&self, findings: &[String], assessment: &str) -> Result<String, ToolError>;
}

/// User prompt asking for a single short diagnosis.
pub fn synthesis_prompt(findings: &[String], assessment: &str) -> String {
    let info = findings
        .iter()
        .map(|f| format!("- {f}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You are a medical diagnosis synthesizer. Based on all the information gathered during \
         a clinical evaluation, provide a single, specific final diagnosis.\n\n\
         ## Information Gathered:\n{info}\n\n\
         ## Clinician's Assessment:\n{assessment}\n\n\
         ## Task:\nProvide a single, specific diagnosis (1-3 words). Examples:\n\
         - \"Acute appendicitis\"\n- \"Community-acquired pneumonia\"\n\
         - \"Type 2 diabetes mellitus\"\n- \"Atrial fibrillation\"\n\nDiagnosis:"
    )
}

/// Index layout of the guideline file.
pub fn guideline_fields() -> IndexFields {
    IndexFields::new(["context", "uncertainties"], "context", "id")
}

#[derive(Debug, Deserialize)]
struct DocumentArgs {
    #[serde(default)]
    new_information: String,
    #[serde(default)]
    uncertainties: String,
    #[serde(default)]
    reference_relevance: String,
    action: String,
    #[serde(default)]
    reason: String,
}

/// Records a fully documented diagnostic step.
pub struct DocumentStepTool {
    sessions: Arc<SessionStore>,
}

impl DocumentStepTool {
    pub fn new(sessions: Arc<SessionStore>) -> Self {
        Self { sessions }
    }

    async fn run(&self, args: DocumentArgs) -> Result<String, ToolError> {
        let action: NextAction = args
            .action
            .parse()
            .map_err(|e: proto::ProtoError| ToolError::InvalidArgs(e.to_string()))?;
        let session_id = require_session()?;
        let draft = StepDraft::new(
            args.new_information,
            Uncertainties::from_rationale_text(&args.uncertainties),
            action.clone(),
        )
        .with_reference_relevance(args.reference_relevance)
        .with_action_reason(args.reason);

        let sessions = Arc::clone(&self.sessions);
        let session = run_blocking(move || sessions.append(&session_id, draft)).await?;
        debug!(session = %session.session_id, steps = session.steps.len(), "Documented step recorded");
        Ok(action.to_string())
    }
}

#[async_trait]
impl Tool for DocumentStepTool {
    fn name(&self) -> &str {
        "document_step"
    }

    fn description(&self) -> &str {
        "Document diagnostic step with structured information: new findings, uncertainties \
         with reasoning, guideline relevance, next action, and action rationale"
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required(
                "new_information",
                ParamType::String,
                "New findings from patient/test (atomic fact)",
            ),
            ParamSpec::required(
                "uncertainties",
                ParamType::String,
                "Differential in the form 'disease1: reasoning1; disease2: reasoning2'",
            ),
            ParamSpec::required(
                "reference_relevance",
                ParamType::String,
                "How the retrieved guidelines apply, or 'No relevant information retrieved'",
            ),
            ParamSpec::required(
                "action",
                ParamType::String,
                "Next action, e.g. 'ASK PATIENT: ...' or 'REQUEST TEST: ...'",
            ),
            ParamSpec::required(
                "reason",
                ParamType::String,
                "Why this action separates the remaining uncertainties",
            ),
        ]
    }

    async fn execute(&self, call_id: &str, args: Value) -> ToolResult {
        let result = match parse_args::<DocumentArgs>(args) {
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
struct GuidelineArgs {
    #[serde(default)]
    new_information: String,
    #[serde(default)]
    uncertainties: String,
}

/// BM25 lookup over past documented experiences.
pub struct QueryGuidelinesTool {
    index: Arc<Bm25Index>,
}

impl QueryGuidelinesTool {
    pub fn new(index: Arc<Bm25Index>) -> Self {
        Self { index }
    }

    fn lookup(&self, query: &str) -> String {
        if self.index.is_empty() {
            return "No medical guidelines available.".to_string();
        }
        let hits = self.index.search(query, GUIDELINE_TOP_K);
        if hits.is_empty() {
            return "No relevant guidelines found.".to_string();
        }
        hits.iter()
            .filter_map(|hit| self.index.get_by_id(hit.id).map(|record| (hit.id, record)))
            .map(|(id, record)| render_guideline(id, &record))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

fn text_of(record: &Value, field: &str) -> String {
    match record.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn render_guideline(id: i64, record: &Value) -> String {
    let uncertainties = match record.get("uncertainties") {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => format!("{k}: {s}"),
                other => format!("{k}: {other}"),
            })
            .collect::<Vec<_>>()
            .join("; "),
        _ => text_of(record, "uncertainties"),
    };
    format!(
        "[Experience #{id}]\nContext: {}\nUncertainties: {uncertainties}\nAction: {}\nRationale: {}",
        text_of(record, "context"),
        text_of(record, "action"),
        text_of(record, "action_reason"),
    )
}

#[async_trait]
impl Tool for QueryGuidelinesTool {
    fn name(&self) -> &str {
        "query_medical_guidelines"
    }

    fn description(&self) -> &str {
        "Search past diagnostic experiences for relevant guidelines. Returns top 5 matches \
         based on clinical context and differential diagnoses."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required(
                "new_information",
                ParamType::String,
                "Current clinical findings (e.g. '25-year-old male with jaundice and ALT 2000')",
            ),
            ParamSpec::required(
                "uncertainties",
                ParamType::String,
                "Current differential ('disease1: reason1; disease2: reason2')",
            ),
        ]
    }

    async fn execute(&self, call_id: &str, args: Value) -> ToolResult {
        match parse_args::<GuidelineArgs>(args) {
            Ok(a) => {
                let query = format!("{} {}", a.new_information, a.uncertainties);
                ToolResult::success(call_id, self.name(), self.lookup(&query))
            }
            Err(e) => ToolResult::error(call_id, self.name(), e.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DocumentedFinalArgs {
    #[serde(default)]
    reason: String,
}

/// Synthesizes and records the final diagnosis from documented findings.
pub struct FinalDiagnosisDocumentedTool {
    sessions: Arc<SessionStore>,
    synthesizer: Arc<dyn DiagnosisSynthesizer>,
}

impl FinalDiagnosisDocumentedTool {
    pub fn new(sessions: Arc<SessionStore>, synthesizer: Arc<dyn DiagnosisSynthesizer>) -> Self {
        Self {
            sessions,
            synthesizer,
        }
    }

    async fn run(&self, reason: String) -> Result<String, ToolError> {
        let session_id = require_session()?;

        let sessions = Arc::clone(&self.sessions);
        let id = session_id.clone();
        let findings = run_blocking(move || sessions.all_new_information(&id)).await?;
        if findings.is_empty() {
            return Err(ToolError::ExecutionFailed(
                "No information documented. Cannot make diagnosis without data.".to_string(),
            ));
        }

        let raw = self
            .synthesizer
            .synthesize(&findings, &reason)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("Failed to synthesize diagnosis: {e}")))?;
        let diagnosis = raw.trim().lines().next().unwrap_or_default().trim().to_string();
        if diagnosis.is_empty() {
            return Err(ToolError::ExecutionFailed(
                "Failed to synthesize diagnosis: empty response".to_string(),
            ));
        }

        let sessions = Arc::clone(&self.sessions);
        let recorded = diagnosis.clone();
        run_blocking(move || sessions.record_final_diagnosis(&session_id, &recorded, &reason))
            .await?;
        info!(diagnosis = %diagnosis, findings = findings.len(), "Documented diagnosis synthesized");
        Ok(format!("DIAGNOSIS READY: {diagnosis}"))
    }
}

#[async_trait]
impl Tool for FinalDiagnosisDocumentedTool {
    fn name(&self) -> &str {
        "final_diagnosis_documented"
    }

    fn description(&self) -> &str {
        "Synthesize final diagnosis from all documented clean information"
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::required(
            "reason",
            ParamType::String,
            "Why ready for diagnosis, or what more rounds would have clarified",
        )]
    }

    async fn execute(&self, call_id: &str, args: Value) -> ToolResult {
        let result = match parse_args::<DocumentedFinalArgs>(args) {
            Ok(a) => self.run(a.reason).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(text) => ToolResult::success(call_id, self.name(), text),
            Err(e) => ToolResult::error(call_id, self.name(), e.to_string()),
        }
    }
}
