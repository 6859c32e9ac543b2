//! Experience collection tools: saving lessons and selecting them for recall.

use std::sync::Arc;

use async_trait::async_trait;
use proto::{ExperienceRecord, NewExperience, ParamSpec, ParamType, ToolResult, Uncertainties};
use retrieval::IndexFields;
use serde::Deserialize;
use serde_json::json;
use store::ExperienceStore;
use tracing::info;

use crate::{Tool, parse_args, run_blocking};

/// Maximum number of experiences a single selection may return.
const MAX_SELECTED: usize = 2;

/// Index layout of the experience file; older records carry `observation`.
pub fn experience_fields() -> IndexFields {
    IndexFields::new(["situation", "observation"], "situation", "id")
}

#[derive(Debug, Deserialize)]
struct SaveArgs {
    case_id: String,
    situation: String,
    uncertainty: String,
    action: String,
    #[serde(default)]
    rationale: String,
}

/// Appends a lesson to the shared experience file.
pub struct SaveExperienceTool {
    store: Arc<ExperienceStore>,
}

impl SaveExperienceTool {
    pub fn new(store: Arc<ExperienceStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for SaveExperienceTool {
    fn name(&self) -> &str {
        "save_experience"
    }

    fn description(&self) -> &str {
        "Save a learning experience from a failed diagnosis case. Captures the clinical \
         situation, the differential at that moment, the action that should have been \
         taken, and why it narrows the differential."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("case_id", ParamType::String, "Identifier for the case (e.g. 'MedQA_Ext_2')"),
            ParamSpec::required(
                "situation",
                ParamType::String,
                "1-2 sentences describing the clinical context and key findings so far",
            ),
            ParamSpec::required(
                "uncertainty",
                ParamType::String,
                "2-4 diseases being considered at this moment (comma-separated or JSON array)",
            ),
            ParamSpec::required(
                "action",
                ParamType::String,
                "The action to take, starting with ASK PATIENT:, PHYSICAL EXAM:, REQUEST TEST: or REQUEST IMAGE:",
            ),
            ParamSpec::required(
                "rationale",
                ParamType::String,
                "1-2 sentences explaining why this action narrows the differential",
            ),
        ]
    }

    async fn execute(&self, call_id: &str, args: serde_json::Value) -> ToolResult {
        let args = match parse_args::<SaveArgs>(args) {
            Ok(a) => a,
            Err(e) => return ToolResult::error(call_id, self.name(), e.to_string()),
        };
        let experience = NewExperience {
            case_id: args.case_id,
            situation: args.situation,
            uncertainty: Uncertainties::from_list_text(&args.uncertainty)
                .hypotheses()
                .into_iter()
                .map(str::to_string)
                .collect(),
            action: args.action,
            rationale: args.rationale,
        };

        let store = Arc::clone(&self.store);
        match run_blocking(move || store.append(experience)).await {
            Ok(record) => {
                info!(id = record.id, case_id = %record.case_id, "Experience saved");
                ToolResult::success(
                    call_id,
                    self.name(),
                    format!(
                        "Experience #{} saved to {}",
                        record.id,
                        self.store.path().display()
                    ),
                )
            }
            Err(e) => ToolResult::error(call_id, self.name(), e.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SelectArgs {
    experience_ids: String,
    #[serde(default)]
    reasoning: String,
}

/// Picks stored experiences by id and renders them as doctor context.
pub struct SelectExperiencesTool {
    store: Arc<ExperienceStore>,
}

impl SelectExperiencesTool {
    pub fn new(store: Arc<ExperienceStore>) -> Self {
        Self { store }
    }
}

/// Ids in the order given; tokens that are not integers are skipped.
fn parse_ids(raw: &str) -> Vec<i64> {
    raw.replace(',', " ")
        .split_whitespace()
        .filter_map(|part| part.parse().ok())
        .collect()
}

fn render_context(record: &ExperienceRecord) -> String {
    let mut context = format!(
        "[Experience #{}]\nSituation: {}\nAction: {}",
        record.id, record.situation, record.action
    );
    if !record.rationale.is_empty() {
        context.push_str(&format!("\nRationale: {}", record.rationale));
    }
    context
}

#[async_trait]
impl Tool for SelectExperiencesTool {
    fn name(&self) -> &str {
        "select_experiences"
    }

    fn description(&self) -> &str {
        "Select relevant diagnostic experiences to provide to the doctor. Pick IDs that \
         DIRECTLY match current situation, or 'none' if no match."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required(
                "experience_ids",
                ParamType::String,
                "Comma-separated IDs (e.g. '3, 7') or 'none'",
            ),
            ParamSpec::required("reasoning", ParamType::String, "Brief explanation of selection"),
        ]
    }

    async fn execute(&self, call_id: &str, args: serde_json::Value) -> ToolResult {
        let args = match parse_args::<SelectArgs>(args) {
            Ok(a) => a,
            Err(e) => return ToolResult::error(call_id, self.name(), e.to_string()),
        };

        let requested = args.experience_ids.trim();
        if requested.is_empty() || requested.eq_ignore_ascii_case("none") {
            return ToolResult::json(
                call_id,
                self.name(),
                json!({
                    "status": "no_relevant_experiences",
                    "selected": [],
                    "reasoning": args.reasoning,
                    "context_for_doctor": "",
                }),
            );
        }

        let ids = parse_ids(requested);
        let store = Arc::clone(&self.store);
        let records = match tokio::task::spawn_blocking(move || store.load_all()).await {
            Ok(records) => records,
            Err(e) => return ToolResult::error(call_id, self.name(), e.to_string()),
        };

        let chosen: Vec<&ExperienceRecord> = ids
            .iter()
            .filter_map(|id| records.iter().find(|r| r.id == *id))
            .take(MAX_SELECTED)
            .collect();

        let selected: Vec<serde_json::Value> = chosen
            .iter()
            .map(|r| json!({ "id": r.id, "action": r.action }))
            .collect();
        let context = chosen
            .iter()
            .map(|r| render_context(r))
            .collect::<Vec<_>>()
            .join("\n\n");

        ToolResult::json(
            call_id,
            self.name(),
            json!({
                "status": "experiences_selected",
                "selected": selected,
                "reasoning": args.reasoning,
                "context_for_doctor": context,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_store() -> (tempfile::TempDir, Arc<ExperienceStore>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(ExperienceStore::new(dir.path().join("experiences.json")));
        for (situation, rationale) in [
            ("Smoker with hemoptysis", "Mass suspected"),
            ("Child with barking cough", ""),
            ("Elderly with confusion", "Check sodium"),
        ] {
            store
                .append(NewExperience {
                    case_id: "seed".to_string(),
                    situation: situation.to_string(),
                    uncertainty: vec![],
                    action: "REQUEST TEST: basic panel".to_string(),
                    rationale: rationale.to_string(),
                })
                .expect("seed");
        }
        (dir, store)
    }

    #[test]
    fn parse_ids_skips_garbage() {
        assert_eq!(parse_ids("3, 7 x 9"), vec![3, 7, 9]);
        assert!(parse_ids("abc").is_empty());
    }

    #[tokio::test]
    async fn save_experience_parses_uncertainty_and_reports_id() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(ExperienceStore::new(dir.path().join("experiences.json")));
        let tool = SaveExperienceTool::new(Arc::clone(&store));
        let result = tool
            .execute(
                "c1",
                json!({
                    "case_id": "MedQA_Ext_2",
                    "situation": "47F with RUQ pain",
                    "uncertainty": "viral hepatitis, cholecystitis",
                    "action": "REQUEST IMAGE: RUQ ultrasound",
                    "rationale": "Distinguishes biliary from hepatic"
                }),
            )
            .await;

        assert!(!result.is_error());
        assert!(result.output.render().starts_with("Experience #1 saved to "));
        let stored = store.get(1).expect("stored");
        assert_eq!(stored.uncertainty, vec!["viral hepatitis", "cholecystitis"]);
    }

    #[tokio::test]
    async fn select_none_returns_empty_context() {
        let (_dir, store) = seeded_store();
        let result = SelectExperiencesTool::new(store)
            .execute("c2", json!({"experience_ids": "None", "reasoning": "no match"}))
            .await;
        let value = result.output.to_value();
        assert_eq!(value["status"], "no_relevant_experiences");
        assert_eq!(value["context_for_doctor"], "");
    }

    #[tokio::test]
    async fn select_caps_at_two_and_skips_unknown_ids() {
        let (_dir, store) = seeded_store();
        let result = SelectExperiencesTool::new(store)
            .execute("c3", json!({"experience_ids": "42, 2, 1, 3", "reasoning": "close"}))
            .await;
        let value = result.output.to_value();
        assert_eq!(value["status"], "experiences_selected");
        assert_eq!(value["selected"].as_array().map(Vec::len), Some(2));
        assert_eq!(value["selected"][0]["id"], 2);

        let context = value["context_for_doctor"].as_str().expect("context");
        assert_eq!(
            context,
            "[Experience #2]\nSituation: Child with barking cough\nAction: REQUEST TEST: basic panel\n\n\
             [Experience #1]\nSituation: Smoker with hemoptysis\nAction: REQUEST TEST: basic panel\nRationale: Mass suspected"
        );
    }
}
