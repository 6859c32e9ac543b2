//! Diagnostic session and experience records persisted by the store.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtoError;
use crate::message::SessionId;

/// Rationale used when a hypothesis is listed without one.
pub const DEFAULT_RATIONALE: &str = "under consideration";

/// Working differential at a point in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Uncertainties {
    /// Plain list of hypotheses.
    List(Vec<String>),
    /// Hypotheses with the reasoning behind each one.
    Rationale(BTreeMap<String, String>),
}

impl Default for Uncertainties {
    fn default() -> Self {
        Uncertainties::List(Vec::new())
    }
}

impl Uncertainties {
    /// Parses a comma separated list or a JSON array of strings.
    pub fn from_list_text(text: &str) -> Self {
        let text = text.trim();
        if text.starts_with('[')
            && let Ok(items) = serde_json::from_str::<Vec<String>>(text)
        {
            return Uncertainties::List(items);
        }
        Uncertainties::List(
            text.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// Parses `hypothesis: rationale; hypothesis: rationale`.
    pub fn from_rationale_text(text: &str) -> Self {
        let mut map = BTreeMap::new();
        for item in text.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            match item.split_once(':') {
                Some((name, reason)) => {
                    map.insert(name.trim().to_string(), reason.trim().to_string());
                }
                None => {
                    map.insert(item.to_string(), DEFAULT_RATIONALE.to_string());
                }
            }
        }
        Uncertainties::Rationale(map)
    }

    /// Hypothesis names in stored order.
    pub fn hypotheses(&self) -> Vec<&str> {
        match self {
            Uncertainties::List(items) => items.iter().map(String::as_str).collect(),
            Uncertainties::Rationale(map) => map.keys().map(String::as_str).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Uncertainties::List(items) => items.is_empty(),
            Uncertainties::Rationale(map) => map.is_empty(),
        }
    }
}

/// Tagged next action chosen at the end of a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NextAction {
    AskPatient(String),
    PhysicalExam(String),
    RequestTest(String),
    RequestImage(String),
    /// Terminal action. The optional text carries the diagnosis.
    DiagnosisReady(Option<String>),
}

const ASK_PATIENT: &str = "ASK PATIENT";
const PHYSICAL_EXAM: &str = "PHYSICAL EXAM";
const REQUEST_TEST: &str = "REQUEST TEST";
const REQUEST_IMAGE: &str = "REQUEST IMAGE";
const DIAGNOSIS_READY: &str = "DIAGNOSIS READY";

impl NextAction {
    /// True for the terminal `DIAGNOSIS READY` action.
    pub fn is_terminal(&self) -> bool {
        matches!(self, NextAction::DiagnosisReady(_))
    }

    /// Text the doctor says next: the bare question for `ASK PATIENT`,
    /// the full tagged action otherwise.
    pub fn utterance(&self) -> String {
        match self {
            NextAction::AskPatient(question) => question.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for NextAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NextAction::AskPatient(body) => write!(f, "{ASK_PATIENT}: {body}"),
            NextAction::PhysicalExam(body) => write!(f, "{PHYSICAL_EXAM}: {body}"),
            NextAction::RequestTest(body) => write!(f, "{REQUEST_TEST}: {body}"),
            NextAction::RequestImage(body) => write!(f, "{REQUEST_IMAGE}: {body}"),
            NextAction::DiagnosisReady(Some(body)) => write!(f, "{DIAGNOSIS_READY}: {body}"),
            NextAction::DiagnosisReady(None) => write!(f, "{DIAGNOSIS_READY}"),
        }
    }
}

impl FromStr for NextAction {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (tag, body) = match trimmed.split_once(':') {
            Some((tag, body)) => (tag.trim(), Some(body.trim())),
            None => (trimmed, None),
        };
        let tag = tag.to_ascii_uppercase();
        let body = body.filter(|b| !b.is_empty()).map(str::to_string);

        if tag == DIAGNOSIS_READY {
            return Ok(NextAction::DiagnosisReady(body));
        }
        let Some(body) = body else {
            return Err(ProtoError::InvalidAction(s.to_string()));
        };
        match tag.as_str() {
            ASK_PATIENT => Ok(NextAction::AskPatient(body)),
            PHYSICAL_EXAM => Ok(NextAction::PhysicalExam(body)),
            REQUEST_TEST => Ok(NextAction::RequestTest(body)),
            REQUEST_IMAGE => Ok(NextAction::RequestImage(body)),
            _ => Err(ProtoError::InvalidAction(s.to_string())),
        }
    }
}

impl TryFrom<String> for NextAction {
    type Error = ProtoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NextAction> for String {
    fn from(action: NextAction) -> Self {
        action.to_string()
    }
}

/// One recorded diagnostic step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// 1-based, increases by one per append.
    pub step_number: u32,
    pub new_information: String,
    #[serde(default, alias = "current_uncertainties")]
    pub uncertainties: Uncertainties,
    #[serde(alias = "next_step_action", alias = "action")]
    pub next_action: NextAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_relevance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_diagnosis: Option<String>,
}

/// Fields of a step before the store numbers it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDraft {
    pub new_information: String,
    pub uncertainties: Uncertainties,
    pub next_action: NextAction,
    pub reference_relevance: Option<String>,
    pub action_reason: Option<String>,
    pub final_diagnosis: Option<String>,
}

impl StepDraft {
    /// Draft with only the mandatory fields set.
    pub fn new(
        new_information: impl Into<String>,
        uncertainties: Uncertainties,
        next_action: NextAction,
    ) -> Self {
        Self {
            new_information: new_information.into(),
            uncertainties,
            next_action,
            reference_relevance: None,
            action_reason: None,
            final_diagnosis: None,
        }
    }

    pub fn with_reference_relevance(mut self, relevance: impl Into<String>) -> Self {
        self.reference_relevance = Some(relevance.into());
        self
    }

    pub fn with_action_reason(mut self, reason: impl Into<String>) -> Self {
        self.action_reason = Some(reason.into());
        self
    }

    pub fn with_final_diagnosis(mut self, diagnosis: impl Into<String>) -> Self {
        self.final_diagnosis = Some(diagnosis.into());
        self
    }
}

/// Persisted state of one diagnostic conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Append-only log, one block per step.
    #[serde(default)]
    pub accumulated_notes: String,
    #[serde(default)]
    pub current_uncertainties: Uncertainties,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_diagnosis: Option<String>,
}

impl Session {
    /// Empty skeleton for a session that has no stored state yet.
    pub fn empty(session_id: SessionId) -> Self {
        Self {
            session_id,
            steps: Vec::new(),
            accumulated_notes: String::new(),
            current_uncertainties: Uncertainties::default(),
            final_diagnosis: None,
        }
    }

    /// Numbers the draft, appends it, and extends the notes.
    pub fn push_step(&mut self, draft: StepDraft) -> &Step {
        let step_number = self.steps.last().map_or(0, |s| s.step_number) + 1;
        let note = format!(
            "[Step {step_number}]\nNew Info: {}\nDifferential: {}\nNext: {}",
            draft.new_information,
            draft.uncertainties.hypotheses().join(", "),
            draft.next_action
        );
        if self.accumulated_notes.is_empty() {
            self.accumulated_notes = note;
        } else {
            self.accumulated_notes.push_str("\n\n");
            self.accumulated_notes.push_str(&note);
        }

        self.current_uncertainties = draft.uncertainties.clone();
        if let Some(diagnosis) = &draft.final_diagnosis {
            self.final_diagnosis = Some(diagnosis.clone());
        }
        self.steps.push(Step {
            step_number,
            new_information: draft.new_information,
            uncertainties: draft.uncertainties,
            next_action: draft.next_action,
            reference_relevance: draft.reference_relevance,
            action_reason: draft.action_reason,
            final_diagnosis: draft.final_diagnosis,
        });
        &self.steps[self.steps.len() - 1]
    }

    /// Non-empty `new_information` entries in step order.
    pub fn new_information(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter(|s| !s.new_information.is_empty())
            .map(|s| s.new_information.clone())
            .collect()
    }

    /// Response implied by the latest step, if any.
    pub fn latest_response(&self) -> Option<String> {
        let step = self.steps.last()?;
        Some(match &step.next_action {
            NextAction::DiagnosisReady(body) => {
                let diagnosis = step
                    .final_diagnosis
                    .as_deref()
                    .or(body.as_deref())
                    .unwrap_or("Unknown diagnosis");
                format!("{DIAGNOSIS_READY}: {diagnosis}")
            }
            other => other.to_string(),
        })
    }

    /// True once a terminal step has been recorded.
    pub fn is_concluded(&self) -> bool {
        self.steps.iter().any(|s| s.next_action.is_terminal())
    }
}

/// A lesson extracted from a past case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperienceRecord {
    pub id: i64,
    #[serde(default)]
    pub case_id: String,
    #[serde(alias = "observation")]
    pub situation: String,
    #[serde(default)]
    pub uncertainty: Vec<String>,
    #[serde(alias = "suggestion")]
    pub action: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub timestamp: String,
}

/// Experience fields supplied by the caller; the store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewExperience {
    pub case_id: String,
    pub situation: String,
    pub uncertainty: Vec<String>,
    pub action: String,
    pub rationale: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_action_parses_known_tags_case_insensitively() {
        let action: NextAction = "ask patient: Any recent travel?".parse().expect("ask");
        assert_eq!(action, NextAction::AskPatient("Any recent travel?".to_string()));
        assert_eq!(action.to_string(), "ASK PATIENT: Any recent travel?");

        let action: NextAction = "REQUEST TEST: Chest_X-Ray".parse().expect("test");
        assert_eq!(action, NextAction::RequestTest("Chest_X-Ray".to_string()));

        let action: NextAction = "DIAGNOSIS READY".parse().expect("ready");
        assert!(action.is_terminal());
    }

    #[test]
    fn next_action_rejects_untagged_or_empty_actions() {
        assert!("Order a CBC".parse::<NextAction>().is_err());
        assert!("REQUEST TEST:".parse::<NextAction>().is_err());
        assert!("REFER: cardiology".parse::<NextAction>().is_err());
    }

    #[test]
    fn utterance_strips_ask_patient_prefix_only() {
        let ask = NextAction::AskPatient("Do you smoke?".to_string());
        assert_eq!(ask.utterance(), "Do you smoke?");
        let exam = NextAction::PhysicalExam("Abdominal palpation".to_string());
        assert_eq!(exam.utterance(), "PHYSICAL EXAM: Abdominal palpation");
    }

    #[test]
    fn uncertainties_from_list_text_accepts_csv_and_json() {
        let csv = Uncertainties::from_list_text("pneumonia, bronchitis , ,COVID-19");
        assert_eq!(csv.hypotheses(), vec!["pneumonia", "bronchitis", "COVID-19"]);

        let json = Uncertainties::from_list_text(r#"["a, b", "c"]"#);
        assert_eq!(json.hypotheses(), vec!["a, b", "c"]);
    }

    #[test]
    fn uncertainties_from_rationale_text_defaults_missing_reasons() {
        let parsed = Uncertainties::from_rationale_text("MI: ST elevation; pericarditis");
        let Uncertainties::Rationale(map) = parsed else {
            panic!("expected rationale map");
        };
        assert_eq!(map["MI"], "ST elevation");
        assert_eq!(map["pericarditis"], DEFAULT_RATIONALE);
    }

    #[test]
    fn push_step_numbers_steps_and_appends_notes() {
        let mut session = Session::empty(SessionId::from("s1"));
        session.push_step(StepDraft::new(
            "fever for 3 days",
            Uncertainties::List(vec!["flu".to_string(), "covid".to_string()]),
            NextAction::RequestTest("PCR".to_string()),
        ));
        session.push_step(StepDraft::new(
            "PCR negative",
            Uncertainties::List(vec!["flu".to_string()]),
            NextAction::AskPatient("Any sick contacts?".to_string()),
        ));

        assert_eq!(session.steps[0].step_number, 1);
        assert_eq!(session.steps[1].step_number, 2);
        assert_eq!(
            session.accumulated_notes,
            "[Step 1]\nNew Info: fever for 3 days\nDifferential: flu, covid\nNext: REQUEST TEST: PCR\n\n\
             [Step 2]\nNew Info: PCR negative\nDifferential: flu\nNext: ASK PATIENT: Any sick contacts?"
        );
        assert_eq!(session.current_uncertainties.hypotheses(), vec!["flu"]);
        assert_eq!(
            session.latest_response().as_deref(),
            Some("ASK PATIENT: Any sick contacts?")
        );
    }

    #[test]
    fn latest_response_reports_final_diagnosis() {
        let mut session = Session::empty(SessionId::from("s2"));
        assert_eq!(session.latest_response(), None);
        session.push_step(
            StepDraft::new(
                "Final diagnosis: Gout",
                Uncertainties::default(),
                NextAction::DiagnosisReady(None),
            )
            .with_final_diagnosis("Gout"),
        );
        assert_eq!(session.latest_response().as_deref(), Some("DIAGNOSIS READY: Gout"));
        assert_eq!(session.final_diagnosis.as_deref(), Some("Gout"));
        assert!(session.is_concluded());
    }

    #[test]
    fn step_reads_legacy_field_names() {
        let raw = r#"{
            "step_number": 1,
            "new_information": "rash",
            "current_uncertainties": ["measles"],
            "next_step_action": "PHYSICAL EXAM: skin"
        }"#;
        let step: Step = serde_json::from_str(raw).expect("legacy step");
        assert_eq!(step.next_action, NextAction::PhysicalExam("skin".to_string()));
        assert_eq!(step.uncertainties.hypotheses(), vec!["measles"]);
    }
}
