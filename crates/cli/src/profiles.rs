//! Built-in agent profiles. `[agents.<name>]` entries in the config file
//! replace these by name.

use std::collections::BTreeMap;

use agent::AgentProfile;

const SIMPLE_AGENT_PROMPT: &str = "You are a careful research assistant. Think through the \
question, use the tools you have to gather evidence, and finish by calling final_result \
with a summary, the supporting details and the sources you relied on.";

const DOCTOR_PROMPT: &str = "You are a physician interviewing a patient to reach a diagnosis. \
Every turn, record what you just learned and your current differential with diagnosis_step, \
choosing exactly one next action: ASK PATIENT, PHYSICAL EXAM, REQUEST TEST or REQUEST IMAGE. \
Only when the remaining uncertainties are resolved, call final_diagnosis with the diagnosis.";

const DOCUMENTATION_PROMPT: &str = "You are a physician who documents every reasoning step. \
Consult query_medical_guidelines for comparable situations, then call document_step with the \
new information, each candidate diagnosis with why it is still open, how the guidelines \
apply, and the single next action. When the evidence is sufficient, call \
final_diagnosis_documented.";

const MEMORY_RETRIEVAL_PROMPT: &str = "You select past diagnostic experiences for a doctor. \
Read the conversation and the retrieved experiences, then call select_experiences with at most \
two IDs that directly match the current situation, or 'none' if nothing applies.";

const EXTRACTOR_PROMPT: &str = "You analyze failed diagnostic cases. Find the moment where the \
doctor went wrong, then call save_experience with the situation at that moment, the \
diseases under consideration, the action that should have been taken and why it narrows \
the differential. Save one to three experiences, then call complete_analysis.";

pub fn builtin_profiles() -> BTreeMap<String, AgentProfile> {
    [
        AgentProfile::new("simple_agent", SIMPLE_AGENT_PROMPT)
            .with_tools(["think", "brave_search", "bash_command", "final_result"])
            .with_terminal_tools(["final_result"]),
        AgentProfile::new("uncertainty_aware_doctor", DOCTOR_PROMPT)
            .with_tools(["diagnosis_step", "final_diagnosis"])
            .with_terminal_tools(["diagnosis_step", "final_diagnosis"])
            .with_max_turns(3),
        AgentProfile::new("uncertainty_documentation_agent", DOCUMENTATION_PROMPT)
            .with_tools(["query_medical_guidelines", "document_step", "final_diagnosis_documented"])
            .with_terminal_tools(["document_step", "final_diagnosis_documented"])
            .with_max_turns(4),
        AgentProfile::new("memory_retrieval_agent", MEMORY_RETRIEVAL_PROMPT)
            .with_tools(["select_experiences"])
            .with_terminal_tools(["select_experiences"])
            .with_max_turns(2),
        AgentProfile::new("experience_extractor", EXTRACTOR_PROMPT)
            .with_tools(["think", "save_experience", "complete_analysis"])
            .with_terminal_tools(["complete_analysis"]),
    ]
    .into_iter()
    .map(|p| (p.name.clone(), p))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_terminal_tool_is_offered() {
        for (name, profile) in builtin_profiles() {
            assert_eq!(name, profile.name);
            assert!(!profile.terminal_tools.is_empty(), "{name} has no terminal tool");
            for terminal in &profile.terminal_tools {
                assert!(profile.tools.contains(terminal), "{name}: {terminal} not offered");
            }
        }
    }

    #[test]
    fn builtin_names_are_stable() {
        let names: Vec<String> = builtin_profiles().into_keys().collect();
        assert_eq!(
            names,
            vec![
                "experience_extractor",
                "memory_retrieval_agent",
                "simple_agent",
                "uncertainty_aware_doctor",
                "uncertainty_documentation_agent",
            ]
        );
    }
}
