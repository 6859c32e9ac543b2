//! Batch episodes over a JSONL file of evaluated cases.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use agent::{AgentRuntime, EpisodeOutcome, OutcomeKind, RunOptions};
use anyhow::Context;
use chrono::Local;
use futures_util::{StreamExt, stream};
use proto::SessionId;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

/// One case line; everything but the fields below is passed through.
pub type Case = Map<String, Value>;

/// Reads one JSON object per non-blank line.
pub fn load_cases(path: &Path) -> anyhow::Result<Vec<Case>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str::<Case>(line)
                .with_context(|| format!("{}:{}: not a JSON object", path.display(), n + 1))
        })
        .collect()
}

/// Cases marked `"correct": false`. A missing flag counts as correct.
pub fn failed_only(cases: Vec<Case>) -> Vec<Case> {
    cases
        .into_iter()
        .filter(|c| !c.get("correct").and_then(Value::as_bool).unwrap_or(true))
        .collect()
}

fn field_text(case: &Case, key: &str) -> Option<String> {
    match case.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// `{dataset}_{scenario_id}`, with the position standing in for a missing id.
pub fn case_id(case: &Case, position: usize) -> String {
    let dataset = field_text(case, "dataset").unwrap_or_else(|| "unknown".to_string());
    let scenario = field_text(case, "scenario_id").unwrap_or_else(|| position.to_string());
    format!("{dataset}_{scenario}")
}

/// Pretty JSON of the case with `case_id` added.
pub fn case_prompt(case: &Case, case_id: &str) -> String {
    let mut data = case.clone();
    data.insert("case_id".to_string(), Value::String(case_id.to_string()));
    serde_json::to_string_pretty(&data).unwrap_or_default()
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseResult {
    pub case_id: String,
    pub correct_diagnosis: Option<Value>,
    pub model_diagnosis: Option<Value>,
    pub status: OutcomeKind,
    pub result: EpisodeOutcome,
}

#[derive(Debug, Serialize)]
pub struct BatchSummary {
    pub timestamp: String,
    pub input_file: String,
    pub total_cases: usize,
    pub failed_cases: usize,
    pub processed: usize,
    pub successful: usize,
    pub results: Vec<CaseResult>,
}

impl BatchSummary {
    pub fn new(input_file: &Path, total_cases: usize, selected: usize, results: Vec<CaseResult>) -> Self {
        Self {
            timestamp: Local::now().to_rfc3339(),
            input_file: input_file.display().to_string(),
            total_cases,
            failed_cases: selected,
            processed: results.len(),
            successful: results
                .iter()
                .filter(|r| r.status != OutcomeKind::Error)
                .count(),
            results,
        }
    }

    /// Writes `run_summary_{timestamp}.json` into `dir`.
    pub fn write(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        let path = dir.join(format!(
            "run_summary_{}.json",
            Local::now().format("%Y%m%d_%H%M%S")
        ));
        std::fs::write(&path, serde_json::to_vec_pretty(self)?)
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }
}

/// Runs every case as its own episode, `concurrency` at a time, each bound
/// to a session named after its case id. Results keep input order.
pub async fn run_cases(runtime: Arc<AgentRuntime>, cases: Vec<Case>, concurrency: usize) -> Vec<CaseResult> {
    let total = cases.len();
    let mut results: Vec<(usize, CaseResult)> = stream::iter(cases.into_iter().enumerate())
        .map(|(position, case)| {
            let runtime = Arc::clone(&runtime);
            async move {
                let id = case_id(&case, position);
                info!(case = %id, index = position + 1, total, "Processing case");
                let prompt = case_prompt(&case, &id);
                let outcome = store::with_session(
                    SessionId::from(id.as_str()),
                    runtime.run(&prompt, RunOptions::default().with_episode_id(&id)),
                )
                .await;
                if outcome.is_error() {
                    warn!(case = %id, "Case finished with an error outcome");
                }
                let result = CaseResult {
                    status: outcome.kind,
                    correct_diagnosis: case.get("correct_diagnosis").cloned(),
                    model_diagnosis: case.get("model_diagnosis").cloned(),
                    case_id: id,
                    result: outcome,
                };
                (position, result)
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;
    results.sort_by_key(|(position, _)| *position);
    results.into_iter().map(|(_, r)| r).collect()
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, sync::Mutex};

    use agent::{AgentProfile, ChatRequest, ChatResponse, LlmProvider, TokenUsage, ToolRegistry};
    use async_trait::async_trait;
    use proto::{LlmError, ToolCall};
    use serde_json::json;

    use super::*;

    fn case(value: Value) -> Case {
        match value {
            Value::Object(map) => map,
            _ => panic!("case must be an object"),
        }
    }

    #[test]
    fn load_cases_skips_blank_lines_and_reports_bad_ones() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cases.jsonl");
        std::fs::write(&path, "{\"scenario_id\": 1}\n\n{\"scenario_id\": 2}\n").expect("write");
        assert_eq!(load_cases(&path).expect("cases").len(), 2);

        std::fs::write(&path, "{\"scenario_id\": 1}\n[1]\n").expect("write");
        let err = load_cases(&path).expect_err("array line");
        assert!(err.to_string().contains(":2:"));
    }

    #[test]
    fn failed_only_keeps_explicit_false() {
        let cases = vec![
            case(json!({"scenario_id": 1, "correct": true})),
            case(json!({"scenario_id": 2, "correct": false})),
            case(json!({"scenario_id": 3})),
        ];
        let failed = failed_only(cases);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0]["scenario_id"], 2);
    }

    #[test]
    fn case_id_and_prompt() {
        let c = case(json!({"dataset": "MedQA_Ext", "scenario_id": 2, "correct": false}));
        assert_eq!(case_id(&c, 9), "MedQA_Ext_2");
        assert_eq!(case_id(&case(json!({})), 4), "unknown_4");

        let prompt = case_prompt(&c, "MedQA_Ext_2");
        let parsed: Value = serde_json::from_str(&prompt).expect("json");
        assert_eq!(parsed["case_id"], "MedQA_Ext_2");
        assert_eq!(parsed["dataset"], "MedQA_Ext");
        assert!(prompt.contains('\n'));
    }

    struct ScriptedLlm(Mutex<VecDeque<ChatResponse>>);

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse, LlmError> {
            self.0
                .lock()
                .expect("lock")
                .pop_front()
                .ok_or_else(|| LlmError::InvalidResponse("No mock response left".to_string()))
        }
    }

    #[tokio::test]
    async fn run_cases_keeps_order_and_counts_successes() {
        let answer = ChatResponse::tool_calls(
            vec![ToolCall::new("final_answer", r#"{"answer":"A","reasoning":"r"}"#)],
            TokenUsage::default(),
        );
        let llm = Arc::new(ScriptedLlm(Mutex::new(VecDeque::from(vec![answer]))));
        let mut registry = ToolRegistry::new();
        registry.register(tools::FinalAnswerTool);
        let profile = AgentProfile::new("batch_test", "Answer.")
            .with_tools(["final_answer"])
            .with_terminal_tools(["final_answer"])
            .with_max_turns(1);
        let runtime = Arc::new(AgentRuntime::new(llm, Arc::new(registry), profile));

        let cases = vec![
            case(json!({"dataset": "d", "scenario_id": 1})),
            case(json!({"dataset": "d", "scenario_id": 2})),
        ];
        // Concurrency 1 makes the single scripted answer go to the first case.
        let results = run_cases(runtime, cases, 1).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].case_id, "d_1");
        assert_eq!(results[0].status, OutcomeKind::Terminal);
        assert_eq!(results[1].status, OutcomeKind::Error);

        let dir = tempfile::tempdir().expect("tempdir");
        let summary = BatchSummary::new(Path::new("cases.jsonl"), 5, 2, results);
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.successful, 1);
        let path = summary.write(dir.path()).expect("write summary");
        let saved: Value = serde_json::from_slice(&std::fs::read(path).expect("read")).expect("json");
        assert_eq!(saved["total_cases"], 5);
        assert_eq!(saved["results"][0]["status"], "terminal");
    }
}
