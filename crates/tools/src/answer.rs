//! Terminal tools that package an episode's answer.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Local;
use proto::{ParamSpec, ParamType, ToolError, ToolResult};
use serde::Deserialize;

use crate::{Tool, parse_args};

const ANSWER_CHOICES: [char; 5] = ['A', 'B', 'C', 'D', 'E'];

#[derive(Debug, Deserialize)]
struct AnswerArgs {
    answer: String,
    #[serde(default)]
    reasoning: String,
}

/// Submits a multiple-choice answer letter.
pub struct FinalAnswerTool;

/// Normalizes to the first character, uppercased, and checks it is A-E.
fn normalize_choice(answer: &str) -> Result<char, ToolError> {
    let trimmed = answer.trim().to_uppercase();
    match trimmed.chars().next() {
        Some(c) if ANSWER_CHOICES.contains(&c) => Ok(c),
        _ => Err(ToolError::InvalidArgs(format!(
            "Invalid answer '{trimmed}'. Must be A, B, C, D, or E."
        ))),
    }
}

#[async_trait]
impl Tool for FinalAnswerTool {
    fn name(&self) -> &str {
        "final_answer"
    }

    fn description(&self) -> &str {
        "Submit your final answer choice for a multiple choice question. \
         Use this when you are ready to provide your diagnosis."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required(
                "answer",
                ParamType::String,
                "The answer choice letter (A, B, C, D, or E)",
            ),
            ParamSpec::required(
                "reasoning",
                ParamType::String,
                "Brief explanation for why this answer was chosen",
            ),
        ]
    }

    async fn execute(&self, call_id: &str, args: serde_json::Value) -> ToolResult {
        let parsed = parse_args::<AnswerArgs>(args)
            .and_then(|a| normalize_choice(&a.answer).map(|c| (c, a.reasoning)));
        match parsed {
            Ok((choice, reasoning)) => ToolResult::json(
                call_id,
                self.name(),
                serde_json::json!({ "answer": choice.to_string(), "reasoning": reasoning }),
            ),
            Err(e) => ToolResult::error(call_id, self.name(), e.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReportArgs {
    summary: String,
    details: String,
    #[serde(default)]
    sources: String,
}

/// Formats a final research report.
pub struct FinalResultTool;

fn format_report(args: &ReportArgs, generated: &str) -> String {
    let mut report = format!(
        "\n# FINAL REPORT\nGenerated: {generated}\n\n## SUMMARY\n{}\n\n## DETAILS\n{}\n",
        args.summary, args.details
    );
    if !args.sources.trim().is_empty() {
        report.push_str(&format!("\n## SOURCES\n{}\n", args.sources));
    }
    report
}

#[async_trait]
impl Tool for FinalResultTool {
    fn name(&self) -> &str {
        "final_result"
    }

    fn description(&self) -> &str {
        "Format and present the final report to the user. Use this when you have \
         gathered enough information to provide a complete answer."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("summary", ParamType::String, "A brief summary of the findings"),
            ParamSpec::required("details", ParamType::String, "Detailed explanation or answer"),
            ParamSpec::optional("sources", ParamType::String, "Sources or references used"),
        ]
    }

    async fn execute(&self, call_id: &str, args: serde_json::Value) -> ToolResult {
        match parse_args::<ReportArgs>(args) {
            Ok(a) => {
                let generated = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
                ToolResult::success(call_id, self.name(), format_report(&a, &generated))
            }
            Err(e) => ToolResult::error(call_id, self.name(), e.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompleteArgs {
    case_id: String,
    #[serde(default)]
    summary: String,
}

/// Ends an experience-extraction episode.
pub struct CompleteAnalysisTool {
    experience_file: PathBuf,
}

impl CompleteAnalysisTool {
    pub fn new(experience_file: impl Into<PathBuf>) -> Self {
        Self {
            experience_file: experience_file.into(),
        }
    }
}

#[async_trait]
impl Tool for CompleteAnalysisTool {
    fn name(&self) -> &str {
        "complete_analysis"
    }

    fn description(&self) -> &str {
        "Signal that you have finished extracting learning experiences from the case."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("case_id", ParamType::String, "Identifier for the case"),
            ParamSpec::required(
                "summary",
                ParamType::String,
                "Brief summary of the key learning points extracted",
            ),
        ]
    }

    async fn execute(&self, call_id: &str, args: serde_json::Value) -> ToolResult {
        match parse_args::<CompleteArgs>(args) {
            Ok(a) => ToolResult::json(
                call_id,
                self.name(),
                serde_json::json!({
                    "status": "completed",
                    "case_id": a.case_id,
                    "summary": a.summary,
                    "experience_file": self.experience_file.display().to_string(),
                }),
            ),
            Err(e) => ToolResult::error(call_id, self.name(), e.to_string()),
        }
    }
}
