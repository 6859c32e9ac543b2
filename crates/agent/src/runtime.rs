//! Turn loop: model call, tool dispatch, terminal detection and forced
//! termination, with a trajectory written for every episode.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use chrono::Local;
use proto::{TokenTotals, ToolCall, ToolDefinition, ToolOutput, ToolResult, Trajectory, TurnRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use store::ConversationLog;
use tracing::{debug, info, warn};

use crate::{
    llm::{ChatMessage, ChatRequest, ChatResponse, LlmProvider, ToolChoice},
    profile::AgentProfile,
    tool_registry::ToolRegistry,
};

/// Where an episode is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeState {
    AwaitingModel,
    DispatchingTools,
    /// A terminal tool returned a non-error result.
    Terminated,
    /// The turn budget ran out and a terminal tool was forced.
    ForcedTermination,
    /// The backend failed.
    Failed,
}

/// Whether the final result is usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Terminal,
    Error,
}

/// Final record of one episode. Every run produces one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeOutcome {
    #[serde(rename = "type")]
    pub kind: OutcomeKind,
    pub state: EpisodeState,
    /// Last tool dispatched, if any.
    pub tool: Option<String>,
    pub turns: usize,
    /// Arguments of the call that produced the result.
    pub args: Option<Value>,
    pub result: ToolOutput,
    pub total_tokens: TokenTotals,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trajectory_file: Option<PathBuf>,
}

impl EpisodeOutcome {
    pub fn is_error(&self) -> bool {
        self.kind == OutcomeKind::Error
    }
}

/// Per-run inputs beyond the user text.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Local image path (sent as a `data:` URL) or a remote URL.
    pub image: Option<String>,
    /// Appended to the trajectory file name.
    pub episode_id: Option<String>,
    /// Overrides the profile turn budget.
    pub max_turns: Option<usize>,
}

impl RunOptions {
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_episode_id(mut self, episode_id: impl Into<String>) -> Self {
        self.episode_id = Some(episode_id.into());
        self
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = Some(max_turns);
        self
    }
}

/// Working state of one episode.
struct Episode {
    state: EpisodeState,
    messages: Vec<ChatMessage>,
    trajectory: Trajectory,
    image: Option<String>,
}

/// The main agent runtime: one profile, one backend, one tool registry.
pub struct AgentRuntime {
    llm: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    profile: AgentProfile,
    tool_defs: Vec<ToolDefinition>,
    trajectory_dir: Option<PathBuf>,
    conversation_log: Option<Arc<ConversationLog>>,
}

impl AgentRuntime {
    /// Creates a runtime offering the profile's tools that exist in `tools`.
    pub fn new(llm: Arc<dyn LlmProvider>, tools: Arc<ToolRegistry>, profile: AgentProfile) -> Self {
        let tool_defs = tools.definitions_for(&profile.tools);
        info!(
            agent = %profile.name,
            model = %profile.model,
            tools = ?tool_defs.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
            "Agent runtime ready"
        );
        Self {
            llm,
            tools,
            profile,
            tool_defs,
            trajectory_dir: None,
            conversation_log: None,
        }
    }

    /// Writes one trajectory file per episode into `dir`.
    pub fn with_trajectory_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.trajectory_dir = Some(dir.into());
        self
    }

    /// Logs every non-error episode to `log`.
    pub fn with_conversation_log(mut self, log: Arc<ConversationLog>) -> Self {
        self.conversation_log = Some(log);
        self
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    /// Runs one episode to completion. Never fails: backend errors and
    /// exhausted budgets come back as error outcomes.
    pub async fn run(&self, input: &str, options: RunOptions) -> EpisodeOutcome {
        let max_turns = options.max_turns.unwrap_or(self.profile.max_turns);
        let mut trajectory = Trajectory::new(
            &self.profile.name,
            options.episode_id.clone().unwrap_or_default(),
            input,
        );
        trajectory.image_url = options.image.clone();
        let mut episode = Episode {
            state: EpisodeState::AwaitingModel,
            messages: vec![ChatMessage::system(&self.profile.system_prompt)],
            trajectory,
            image: options.image.clone(),
        };

        let user_message = match &options.image {
            None => ChatMessage::user(input),
            Some(image) => match resolve_image_url(image).await {
                Ok(url) => ChatMessage::user_with_image(input, url),
                Err(e) => {
                    warn!(agent = %self.profile.name, image = %image, error = %e, "Failed to read image");
                    episode.state = EpisodeState::Failed;
                    let output = ToolOutput::error(format!("Failed to read image {image}: {e}"));
                    return self.finalize(episode, output, None, None).await;
                }
            },
        };
        episode.messages.push(user_message);

        for turn in 0..max_turns {
            episode.state = EpisodeState::AwaitingModel;
            let request = self.request(&episode.messages, self.tool_defs.clone(), ToolChoice::Auto);
            debug!(agent = %self.profile.name, turn, "LLM call");
            let response = match self.llm.chat(request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(agent = %self.profile.name, turn, error = %e, "Backend error");
                    episode.state = EpisodeState::Failed;
                    return self.finalize(episode, ToolOutput::error(e.to_string()), None, None).await;
                }
            };
            record_usage(&mut episode.trajectory, &response);

            let thinking = response.content.clone().unwrap_or_default();
            episode.messages.push(ChatMessage::assistant_tool_calls(
                thinking.clone(),
                response.tool_calls.clone(),
            ));

            if response.tool_calls.is_empty() {
                debug!(agent = %self.profile.name, turn, "No tool calls; recording thinking turn");
                episode.trajectory.turns.push(self.turn_record(thinking, None, None, None));
                continue;
            }

            episode.state = EpisodeState::DispatchingTools;
            for call in &response.tool_calls {
                let (args, result) = self.dispatch(&mut episode, call, &thinking).await;
                if !self.profile.is_terminal(&call.name) {
                    continue;
                }
                if result.is_error() {
                    warn!(agent = %self.profile.name, tool = %call.name, "Terminal tool error, retrying");
                    continue;
                }
                info!(agent = %self.profile.name, tool = %call.name, turn, "Terminal tool succeeded");
                episode.state = EpisodeState::Terminated;
                return self
                    .finalize(episode, result.output, Some(call.name.clone()), Some(args))
                    .await;
            }
        }

        self.force_terminal(episode).await
    }

    fn request(&self, messages: &[ChatMessage], tools: Vec<ToolDefinition>, tool_choice: ToolChoice) -> ChatRequest {
        ChatRequest {
            model: self.profile.model.clone(),
            messages: messages.to_vec(),
            tools,
            temperature: self.profile.temperature,
            tool_choice,
        }
    }

    /// Parses, executes and records one call. Returns the parsed args.
    async fn dispatch(&self, episode: &mut Episode, call: &ToolCall, thinking: &str) -> (Value, ToolResult) {
        let (args, result) = match call.parse_arguments() {
            Ok(map) => {
                let args = Value::Object(map);
                debug!(agent = %self.profile.name, tool = %call.name, args = %args, "Dispatching tool");
                let result = self.tools.execute(&call.id, &call.name, args.clone()).await;
                (args, result)
            }
            Err(e) => {
                warn!(agent = %self.profile.name, tool = %call.name, raw = %call.arguments, "Argument parse error");
                (
                    Value::Object(Default::default()),
                    ToolResult::error(&call.id, &call.name, e.to_string()),
                )
            }
        };

        let kept = self
            .profile
            .is_verbose(&call.name)
            .then(|| result.output.to_value());
        episode.trajectory.turns.push(self.turn_record(
            thinking.to_string(),
            Some(call.name.clone()),
            Some(args.clone()),
            kept,
        ));
        episode
            .messages
            .push(ChatMessage::tool_result(&call.id, &call.name, result.output.render()));
        (args, result)
    }

    async fn force_terminal(&self, mut episode: Episode) -> EpisodeOutcome {
        info!(agent = %self.profile.name, "Max turns reached, forcing decision");
        episode.state = EpisodeState::ForcedTermination;
        if self.profile.terminal_tools.is_empty() {
            return self
                .finalize(episode, ToolOutput::error("Max turns reached"), None, None)
                .await;
        }

        episode.messages.push(ChatMessage::user(format!(
            "REQUIRED: Use one of these tools now: [{}]",
            self.profile.terminal_tools.join(", ")
        )));
        let terminal_defs: Vec<ToolDefinition> = self
            .tool_defs
            .iter()
            .filter(|d| self.profile.is_terminal(&d.name))
            .cloned()
            .collect();

        let request = self.request(&episode.messages, terminal_defs, ToolChoice::Required);
        match self.llm.chat(request).await {
            Ok(response) => {
                record_usage(&mut episode.trajectory, &response);
                let thinking = response.content.clone().unwrap_or_default();
                if let Some(call) = response.tool_calls.first() {
                    episode.messages.push(ChatMessage::assistant_tool_calls(
                        thinking.clone(),
                        vec![call.clone()],
                    ));
                    let (args, result) = self.dispatch(&mut episode, call, &thinking).await;
                    info!(agent = %self.profile.name, tool = %call.name, "Forced terminal call");
                    return self
                        .finalize(episode, result.output, Some(call.name.clone()), Some(args))
                        .await;
                }
                warn!(agent = %self.profile.name, "Forced call returned no tool call");
            }
            Err(e) => warn!(agent = %self.profile.name, error = %e, "Force failed"),
        }
        self.finalize(episode, ToolOutput::error("Force terminal tool failed"), None, None)
            .await
    }

    fn turn_record(
        &self,
        thinking: String,
        tool: Option<String>,
        args: Option<Value>,
        result: Option<Value>,
    ) -> TurnRecord {
        TurnRecord {
            agent_type: self.profile.name.clone(),
            thinking_process: thinking,
            tool,
            args,
            result,
        }
    }

    async fn finalize(
        &self,
        mut episode: Episode,
        result: ToolOutput,
        tool: Option<String>,
        args: Option<Value>,
    ) -> EpisodeOutcome {
        let kind = if result.is_error() {
            OutcomeKind::Error
        } else {
            OutcomeKind::Terminal
        };
        let last_tool = tool.or_else(|| {
            episode
                .trajectory
                .turns
                .iter()
                .rev()
                .find_map(|t| t.tool.clone())
        });

        if kind == OutcomeKind::Terminal {
            self.log_conversation(&episode, &result).await;
        }

        let mut outcome = EpisodeOutcome {
            kind,
            state: episode.state,
            tool: last_tool,
            turns: episode.trajectory.turns.len(),
            args,
            result,
            total_tokens: episode.trajectory.total_tokens,
            trajectory_file: None,
        };
        episode.trajectory.result = serde_json::to_value(&outcome).ok();
        outcome.trajectory_file = self.save_trajectory(&episode.trajectory).await;

        info!(
            agent = %self.profile.name,
            kind = ?outcome.kind,
            state = ?outcome.state,
            turns = outcome.turns,
            input_tokens = outcome.total_tokens.input,
            output_tokens = outcome.total_tokens.output,
            "Episode finished"
        );
        outcome
    }

    async fn log_conversation(&self, episode: &Episode, result: &ToolOutput) {
        let Some(log) = &self.conversation_log else {
            return;
        };
        let log = Arc::clone(log);
        let query = episode.trajectory.input.clone();
        let image = episode.image.clone();
        let response = result.to_value();
        let appended = tokio::task::spawn_blocking(move || log.append(&query, image.as_deref(), response)).await;
        match appended {
            Ok(Ok(record)) => debug!(agent = %self.profile.name, id = record.id, "Conversation logged"),
            Ok(Err(e)) => warn!(agent = %self.profile.name, error = %e, "Failed to log conversation"),
            Err(e) => warn!(agent = %self.profile.name, error = %e, "Conversation log task failed"),
        }
    }

    async fn save_trajectory(&self, trajectory: &Trajectory) -> Option<PathBuf> {
        let dir = self.trajectory_dir.as_ref()?;
        let path = dir.join(trajectory_file_name(
            &trajectory.agent,
            &Local::now().format("%Y%m%d_%H%M%S").to_string(),
            &trajectory.episode_id,
        ));
        let body = match serde_json::to_vec_pretty(trajectory) {
            Ok(body) => body,
            Err(e) => {
                warn!(agent = %trajectory.agent, error = %e, "Failed to serialize trajectory");
                return None;
            }
        };
        let written = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(&path, body).await
        }
        .await;
        match written {
            Ok(()) => {
                debug!(path = %path.display(), "Trajectory saved");
                Some(path)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to write trajectory");
                None
            }
        }
    }
}

fn record_usage(trajectory: &mut Trajectory, response: &ChatResponse) {
    trajectory.total_tokens.add(
        u64::from(response.usage.prompt_tokens),
        u64::from(response.usage.completion_tokens),
    );
}

/// `{agent}_trajectory_{timestamp}[_{episode}].json`
fn trajectory_file_name(agent: &str, timestamp: &str, episode_id: &str) -> String {
    if episode_id.is_empty() {
        format!("{agent}_trajectory_{timestamp}.json")
    } else {
        format!("{agent}_trajectory_{timestamp}_{episode_id}.json")
    }
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "image/jpeg",
    }
}

/// Local files become base64 `data:` URLs; anything else passes through.
async fn resolve_image_url(image: &str) -> std::io::Result<String> {
    let path = Path::new(image);
    if !tokio::fs::metadata(path).await.is_ok_and(|m| m.is_file()) {
        return Ok(image.to_string());
    }
    let bytes = tokio::fs::read(path).await?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(format!("data:{};base64,{encoded}", mime_for(path)))
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, sync::Mutex};

    use async_trait::async_trait;
    use proto::{LlmError, ParamSpec, ParamType, ToolCall, ToolResult};

    use super::*;
    use crate::llm::TokenUsage;

    /// Scripted backend that also records the requests it received.
    struct MockLlm {
        queue: Mutex<VecDeque<Result<ChatResponse, LlmError>>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl MockLlm {
        fn new(responses: Vec<Result<ChatResponse, LlmError>>) -> Self {
            Self {
                queue: Mutex::new(VecDeque::from(responses)),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().expect("lock requests").clone()
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlm {
        async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, LlmError> {
            self.requests.lock().expect("lock requests").push(req);
            self.queue
                .lock()
                .expect("lock queue")
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::InvalidResponse("No mock response left".to_string())))
        }
    }

    struct EchoTool;

    #[async_trait]
    impl tools::Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo test tool"
        }

        fn parameters(&self) -> Vec<ParamSpec> {
            vec![ParamSpec::required("value", ParamType::String, "Text")]
        }

        async fn execute(&self, call_id: &str, args: serde_json::Value) -> ToolResult {
            let value = args["value"].as_str().unwrap_or_default();
            ToolResult::success(call_id, self.name(), format!("echo:{value}"))
        }
    }

    fn usage(prompt: u32, completion: u32) -> TokenUsage {
        TokenUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
        }
    }

    fn calls(calls: &[(&str, &str)]) -> ChatResponse {
        ChatResponse::tool_calls(
            calls.iter().map(|(name, args)| ToolCall::new(*name, *args)).collect(),
            usage(10, 5),
        )
    }

    fn build_registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        registry.register(tools::FinalAnswerTool);
        registry.register(tools::ThinkTool);
        Arc::new(registry)
    }

    fn profile() -> AgentProfile {
        AgentProfile::new("test_agent", "You answer questions.")
            .with_tools(["think", "echo", "final_answer"])
            .with_terminal_tools(["final_answer"])
            .with_max_turns(3)
            .with_model("mock-model")
    }

    fn runtime(llm: Arc<MockLlm>) -> AgentRuntime {
        AgentRuntime::new(llm, build_registry(), profile())
    }

    #[tokio::test]
    async fn terminal_success_on_first_turn_ends_episode() {
        let llm = Arc::new(MockLlm::new(vec![Ok(calls(&[(
            "final_answer",
            r#"{"answer":"c","reasoning":"classic"}"#,
        )]))]));
        let outcome = runtime(Arc::clone(&llm)).run("Which one?", RunOptions::default()).await;

        assert_eq!(outcome.kind, OutcomeKind::Terminal);
        assert_eq!(outcome.state, EpisodeState::Terminated);
        assert_eq!(outcome.turns, 1);
        assert_eq!(outcome.tool.as_deref(), Some("final_answer"));
        assert_eq!(outcome.result.to_value()["answer"], "C");
        assert_eq!(outcome.total_tokens, TokenTotals { input: 10, output: 5 });
        assert_eq!(llm.requests().len(), 1);

        let first = &llm.requests()[0];
        assert_eq!(first.tool_choice, ToolChoice::Auto);
        let offered: Vec<&str> = first.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(offered, vec!["think", "echo", "final_answer"]);
    }

    #[tokio::test]
    async fn terminal_success_skips_rest_of_batch() {
        let llm = Arc::new(MockLlm::new(vec![Ok(calls(&[
            ("final_answer", r#"{"answer":"A","reasoning":"r"}"#),
            ("echo", r#"{"value":"late"}"#),
        ]))]));
        let outcome = runtime(llm).run("q", RunOptions::default()).await;
        assert_eq!(outcome.turns, 1);
        assert_eq!(outcome.tool.as_deref(), Some("final_answer"));
    }

    #[tokio::test]
    async fn terminal_errors_lead_to_forced_restricted_call() {
        let bad = r#"{"answer":"Z","reasoning":"?"}"#;
        let llm = Arc::new(MockLlm::new(vec![
            Ok(calls(&[("final_answer", bad)])),
            Ok(calls(&[("final_answer", bad), ("echo", r#"{"value":"still here"}"#)])),
            Ok(calls(&[("final_answer", bad)])),
            Ok(calls(&[("final_answer", bad)])),
        ]));
        let outcome = runtime(Arc::clone(&llm)).run("q", RunOptions::default()).await;

        assert_eq!(outcome.state, EpisodeState::ForcedTermination);
        assert_eq!(outcome.kind, OutcomeKind::Error);
        assert_eq!(outcome.turns, 5);

        let requests = llm.requests();
        assert_eq!(requests.len(), 4);
        let forced = &requests[3];
        assert_eq!(forced.tool_choice, ToolChoice::Required);
        assert_eq!(forced.tools.len(), 1);
        assert_eq!(forced.tools[0].name, "final_answer");
        let last = forced.messages.last().expect("last message");
        assert_eq!(last.content, "REQUIRED: Use one of these tools now: [final_answer]");

        // The echo after a failed terminal call in the same batch still ran.
        assert!(
            requests[2]
                .messages
                .iter()
                .any(|m| m.content == "echo:still here")
        );
    }

    #[tokio::test]
    async fn forced_call_can_succeed() {
        let llm = Arc::new(MockLlm::new(vec![
            Ok(calls(&[("think", r#"{"thought":"a"}"#)])),
            Ok(ChatResponse::text("pondering", usage(1, 1))),
            Ok(calls(&[("think", r#"{"thought":"b"}"#)])),
            Ok(calls(&[("final_answer", r#"{"answer":"b","reasoning":"forced"}"#)])),
        ]));
        let outcome = runtime(llm).run("q", RunOptions::default()).await;
        assert_eq!(outcome.kind, OutcomeKind::Terminal);
        assert_eq!(outcome.state, EpisodeState::ForcedTermination);
        assert_eq!(outcome.result.to_value()["answer"], "B");
        assert_eq!(outcome.turns, 4);
    }

    #[tokio::test]
    async fn forced_call_without_tool_call_fails_explicitly() {
        let llm = Arc::new(MockLlm::new(vec![
            Ok(ChatResponse::text("hmm", TokenUsage::default())),
            Ok(ChatResponse::text("hmm", TokenUsage::default())),
            Ok(ChatResponse::text("hmm", TokenUsage::default())),
            Ok(ChatResponse::text("refuse", TokenUsage::default())),
        ]));
        let outcome = runtime(llm).run("q", RunOptions::default()).await;
        assert_eq!(
            outcome.result.error_message().as_deref(),
            Some("Force terminal tool failed")
        );
    }

    #[tokio::test]
    async fn no_terminal_tools_ends_with_max_turns_error() {
        let llm = Arc::new(MockLlm::new(vec![Ok(calls(&[("echo", r#"{"value":"x"}"#)]))]));
        let profile = profile().with_terminal_tools(Vec::<String>::new()).with_max_turns(1);
        let outcome = AgentRuntime::new(llm, build_registry(), profile)
            .run("q", RunOptions::default())
            .await;
        assert_eq!(outcome.result.error_message().as_deref(), Some("Max turns reached"));
        assert_eq!(outcome.tool.as_deref(), Some("echo"));
    }

    #[tokio::test]
    async fn backend_error_fails_episode() {
        let llm = Arc::new(MockLlm::new(vec![Err(LlmError::Api("rate limited".to_string()))]));
        let outcome = runtime(llm).run("q", RunOptions::default()).await;
        assert_eq!(outcome.state, EpisodeState::Failed);
        assert_eq!(outcome.result.error_message().as_deref(), Some("rate limited"));
        assert_eq!(outcome.turns, 0);
    }

    #[tokio::test]
    async fn bad_arguments_become_error_result_and_loop_continues() {
        let llm = Arc::new(MockLlm::new(vec![
            Ok(calls(&[("echo", "{not json")])),
            Ok(calls(&[("final_answer", r#"{"answer":"D","reasoning":"ok"}"#)])),
        ]));
        let outcome = runtime(Arc::clone(&llm)).run("q", RunOptions::default()).await;
        assert_eq!(outcome.turns, 2);
        assert_eq!(outcome.kind, OutcomeKind::Terminal);

        let second = &llm.requests()[1];
        let tool_msg = second.messages.last().expect("tool message");
        assert!(tool_msg.content.contains("Invalid JSON arguments"));
    }

    #[tokio::test]
    async fn trajectory_and_conversation_log_are_written() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = Arc::new(ConversationLog::new(dir.path().join("conversation_log.json")));
        let llm = Arc::new(MockLlm::new(vec![
            Ok(calls(&[("echo", r#"{"value":"v"}"#)])),
            Ok(calls(&[("final_answer", r#"{"answer":"E","reasoning":"r"}"#)])),
        ]));
        let mut profile = profile();
        profile.verbose_tools = vec!["echo".to_string()];
        let outcome = AgentRuntime::new(llm, build_registry(), profile)
            .with_trajectory_dir(dir.path().join("trajectories"))
            .with_conversation_log(Arc::clone(&log))
            .run("Case 12", RunOptions::default().with_episode_id("case12"))
            .await;

        let path = outcome.trajectory_file.clone().expect("trajectory file");
        let name = path.file_name().and_then(|n| n.to_str()).expect("name");
        assert!(name.starts_with("test_agent_trajectory_"));
        assert!(name.ends_with("_case12.json"));

        let saved: Trajectory =
            serde_json::from_slice(&std::fs::read(&path).expect("read")).expect("parse");
        assert_eq!(saved.turns.len(), 2);
        assert_eq!(saved.turns[0].result, Some(Value::String("echo:v".to_string())));
        assert_eq!(saved.turns[1].result, None);
        assert_eq!(saved.result.as_ref().map(|r| r["type"].clone()), Some(Value::from("terminal")));

        let entries = log.load_all();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].user_query, "Case 12");
    }

    #[tokio::test]
    async fn error_outcomes_are_not_logged() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log = Arc::new(ConversationLog::new(dir.path().join("conversation_log.json")));
        let llm = Arc::new(MockLlm::new(vec![Err(LlmError::Api("down".to_string()))]));
        let _ = runtime(llm)
            .with_conversation_log(Arc::clone(&log))
            .run("q", RunOptions::default())
            .await;
        assert!(log.load_all().is_empty());
    }

    #[tokio::test]
    async fn local_image_is_inlined_as_data_url() {
        let dir = tempfile::tempdir().expect("tempdir");
        let image = dir.path().join("scan.png");
        std::fs::write(&image, [0x89, b'P', b'N', b'G']).expect("write image");
        let llm = Arc::new(MockLlm::new(vec![Ok(calls(&[(
            "final_answer",
            r#"{"answer":"A","reasoning":"r"}"#,
        )]))]));
        let image_path = image.to_string_lossy().to_string();
        runtime(Arc::clone(&llm))
            .run("Read this", RunOptions::default().with_image(&image_path))
            .await;

        let url = llm.requests()[0].messages[1].image_url.clone().expect("image url");
        assert!(url.starts_with("data:image/png;base64,"));

        assert_eq!(
            resolve_image_url("https://example.org/x.jpg").await.expect("remote"),
            "https://example.org/x.jpg"
        );
    }

    #[test]
    fn trajectory_file_name_appends_episode_when_present() {
        assert_eq!(
            trajectory_file_name("simple_agent", "20260101_120000", ""),
            "simple_agent_trajectory_20260101_120000.json"
        );
        assert_eq!(
            trajectory_file_name("simple_agent", "20260101_120000", "ep7"),
            "simple_agent_trajectory_20260101_120000_ep7.json"
        );
    }
}
