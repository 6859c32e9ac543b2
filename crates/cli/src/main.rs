//! CLI entrypoint and subcommand orchestration.

mod batch;
mod config;
mod profiles;
#[cfg(test)]
mod test_support;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use agent::{
    AgentRuntime, DialogueTurn, ExperienceRecall, LlmProvider, LlmSynthesizer, OpenAiProvider, RunOptions,
    ToolRegistry,
};
use anyhow::Context;
use clap::{Parser, Subcommand};
use proto::SessionId;
use retrieval::Bm25Index;
use store::{ConversationLog, ExperienceStore, SessionStore};
use tools::{
    BashTool, BraveSearchTool, CompleteAnalysisTool, DiagnosisStepTool, DocumentStepTool, FinalAnswerTool,
    FinalDiagnosisDocumentedTool, FinalDiagnosisTool, FinalResultTool, QueryGuidelinesTool, SaveExperienceTool,
    SelectExperiencesTool, ThinkTool, experience_fields, guideline_fields,
};
use tracing::{info, warn};
#[cfg(not(test))]
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

/// Top-level command-line arguments.
#[derive(Parser)]
#[command(name = "clinic")]
#[command(about = "Diagnostic research agent runner", version = "0.1.0")]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable debug logging to <data_dir>/logs/debug.log
    #[arg(long, default_value_t = false)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one episode and print its outcome as JSON
    Run {
        /// Agent profile name
        #[arg(short, long, default_value = "simple_agent")]
        agent: String,

        /// User input for the episode
        input: String,

        /// Local image path or image URL
        #[arg(long)]
        image: Option<String>,

        /// Session bound for session-aware tools (random when omitted)
        #[arg(short, long)]
        session: Option<String>,

        /// Episode id appended to the trajectory file name
        #[arg(long)]
        episode: Option<String>,

        /// Override the profile turn budget
        #[arg(long)]
        max_turns: Option<usize>,
    },

    /// Run an agent over a JSONL file of evaluated cases
    Batch {
        /// JSONL file, one case per line
        file: PathBuf,

        #[arg(short, long, default_value = "experience_extractor")]
        agent: String,

        /// Process every case, not only those marked `"correct": false`
        #[arg(long, default_value_t = false)]
        all: bool,

        /// Episodes in flight at once
        #[arg(long, default_value_t = 5)]
        concurrency: usize,

        /// Directory for the run summary (defaults to the data dir)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Pick past experiences relevant to a conversation
    Recall {
        /// Conversation the recall belongs to
        #[arg(short, long)]
        session: String,

        /// JSON array of {"speaker", "content"} turns
        history: PathBuf,
    },

    /// Inspect or reset diagnostic sessions
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },

    /// Inspect the experience collection
    Experience {
        #[command(subcommand)]
        command: ExperienceCommands,
    },

    /// List available agent profiles
    Agents,
}

#[derive(Subcommand)]
enum SessionCommands {
    /// Print a session as JSON
    Show { id: String },
    /// Delete a session file
    Clear { id: String },
}

#[derive(Subcommand)]
enum ExperienceCommands {
    /// Keyword search over stored experiences
    Search {
        query: String,
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },
    /// Print every stored experience
    List,
}

#[cfg(not(test))]
#[tokio::main]
/// Program entrypoint.
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref());
    let log_root = match &config {
        Ok(c) => c.paths.data_dir.clone(),
        Err(_) => config::PathsConfig::default().data_dir,
    };

    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    // WorkerGuard must outlive main() so buffered file writes are flushed on exit.
    let _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>;

    if cli.debug {
        let log_dir = log_root.join("logs");
        std::fs::create_dir_all(&log_dir).ok();
        let appender = tracing_appender::rolling::daily(&log_dir, "debug.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        _file_guard = Some(guard);
        let console = fmt::layer().with_target(false).with_filter(console_filter);
        let file = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
            .with_filter(EnvFilter::new("debug,hyper_util=info,rustls=info,reqwest=info"));
        tracing_subscriber::registry()
            .with(console)
            .with(file)
            .init();
        info!(
            version = env!("CARGO_PKG_VERSION"),
            log_level = %cli.log_level,
            "========== clinic session start =========="
        );
    } else {
        _file_guard = None;
        fmt()
            .with_env_filter(console_filter)
            .with_target(false)
            .init();
    }

    let config = config.unwrap_or_else(|e| {
        warn!("Failed to load config ({e}), using defaults");
        Config::default()
    });

    match cli.command {
        Commands::Run {
            agent,
            input,
            image,
            session,
            episode,
            max_turns,
        } => {
            let options = RunOptions {
                image,
                episode_id: episode,
                max_turns,
            };
            cmd_run(&config, &agent, &input, session, options).await
        }
        Commands::Batch {
            file,
            agent,
            all,
            concurrency,
            output_dir,
        } => cmd_batch(&config, &file, &agent, all, concurrency, output_dir).await,
        Commands::Recall { session, history } => cmd_recall(&config, &session, &history).await,
        Commands::Session { command } => match command {
            SessionCommands::Show { id } => cmd_session_show(&config, &id),
            SessionCommands::Clear { id } => cmd_session_clear(&config, &id),
        },
        Commands::Experience { command } => match command {
            ExperienceCommands::Search { query, top_k } => cmd_experience_search(&config, &query, top_k),
            ExperienceCommands::List => cmd_experience_list(&config),
        },
        Commands::Agents => {
            for name in config.agent_names() {
                println!("{name}");
            }
            Ok(())
        }
    }
}

/// Builds the chat backend for the configured provider.
fn build_provider(config: &Config) -> Arc<dyn LlmProvider> {
    let api_key = config.resolve_api_key();
    if api_key.is_empty() {
        warn!("No API key configured. Set CLINIC_API_KEY or OPENROUTER_API_KEY.");
    }
    match config.llm.effective_base_url() {
        Some(base_url) => Arc::new(OpenAiProvider::with_base_url(api_key, base_url)),
        None => Arc::new(OpenAiProvider::new(api_key)),
    }
}

/// Registers every built-in tool against the configured stores.
fn build_registry(config: &Config, llm: Arc<dyn LlmProvider>) -> anyhow::Result<ToolRegistry> {
    let sessions = Arc::new(SessionStore::new(config.paths.sessions_dir())?);
    let experience_file = config.paths.experience_file();
    let experiences = Arc::new(ExperienceStore::new(&experience_file));
    let guidelines = Arc::new(Bm25Index::load(config.paths.guideline_file(), guideline_fields()));
    let synthesizer = Arc::new(LlmSynthesizer::new(llm, config.llm.effective_model()));
    let brave_key = Some(config.tools.brave_api_key.clone());

    let mut registry = ToolRegistry::new();
    registry.register(BashTool::with_timeout(config.tools.bash_timeout_secs));
    registry.register(ThinkTool);
    registry.register(BraveSearchTool::new(brave_key));
    registry.register(FinalAnswerTool);
    registry.register(FinalResultTool);
    registry.register(CompleteAnalysisTool::new(&experience_file));
    registry.register(SaveExperienceTool::new(Arc::clone(&experiences)));
    registry.register(SelectExperiencesTool::new(experiences));
    registry.register(DiagnosisStepTool::new(Arc::clone(&sessions)));
    registry.register(FinalDiagnosisTool::new(Arc::clone(&sessions)));
    registry.register(DocumentStepTool::new(Arc::clone(&sessions)));
    registry.register(QueryGuidelinesTool::new(guidelines));
    registry.register(FinalDiagnosisDocumentedTool::new(sessions, synthesizer));
    Ok(registry)
}

/// Runtime for one agent profile, wired to trajectory and conversation logs.
fn build_runtime(
    config: &Config,
    agent: &str,
    llm: Arc<dyn LlmProvider>,
    registry: Arc<ToolRegistry>,
) -> anyhow::Result<AgentRuntime> {
    let profile = config.profile(agent)?;
    Ok(AgentRuntime::new(llm, registry, profile)
        .with_trajectory_dir(config.paths.trajectory_dir())
        .with_conversation_log(Arc::new(ConversationLog::new(config.paths.conversation_log()))))
}

async fn cmd_run(
    config: &Config,
    agent: &str,
    input: &str,
    session: Option<String>,
    options: RunOptions,
) -> anyhow::Result<()> {
    let llm = build_provider(config);
    let registry = Arc::new(build_registry(config, Arc::clone(&llm))?);
    let runtime = build_runtime(config, agent, llm, registry)?;
    let session_id = session.map(SessionId::from).unwrap_or_default();

    println!("{}", format_run_header(agent, &session_id));
    let outcome = store::with_session(session_id, runtime.run(input, options)).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if outcome.is_error() {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_batch(
    config: &Config,
    file: &Path,
    agent: &str,
    all: bool,
    concurrency: usize,
    output_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let cases = batch::load_cases(file)?;
    let total = cases.len();
    let selected = if all { cases } else { batch::failed_only(cases) };
    info!(total, selected = selected.len(), file = %file.display(), "Cases loaded");
    if selected.is_empty() {
        println!("No cases to process.");
        return Ok(());
    }

    let llm = build_provider(config);
    let registry = Arc::new(build_registry(config, Arc::clone(&llm))?);
    let runtime = Arc::new(build_runtime(config, agent, llm, registry)?);

    let selected_count = selected.len();
    let results = batch::run_cases(runtime, selected, concurrency).await;
    let summary = batch::BatchSummary::new(file, total, selected_count, results);
    let out_dir = output_dir.unwrap_or_else(|| config.paths.data_dir.clone());
    let path = summary.write(&out_dir)?;

    let experiences = ExperienceStore::new(config.paths.experience_file()).load_all().len();
    println!("Total cases: {}", summary.total_cases);
    println!("Selected cases: {}", summary.failed_cases);
    println!("Processed: {}", summary.processed);
    println!("Successful: {}", summary.successful);
    println!("Experiences in file: {experiences}");
    println!("Summary saved to: {}", path.display());
    Ok(())
}

async fn cmd_recall(config: &Config, session: &str, history: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(history).with_context(|| format!("reading {}", history.display()))?;
    let turns: Vec<DialogueTurn> = serde_json::from_str(&raw).context("history must be a JSON array of turns")?;

    let llm = build_provider(config);
    let registry = Arc::new(build_registry(config, Arc::clone(&llm))?);
    let selector = Arc::new(build_runtime(config, "memory_retrieval_agent", llm, registry)?);
    let index = Arc::new(Bm25Index::load(config.paths.experience_file(), experience_fields()));
    let recall = ExperienceRecall::with_capacity(index, selector, config.retrieval.session_capacity);

    let context = recall.recall(session, &turns).await;
    if context.is_empty() {
        println!("No relevant experiences.");
    } else {
        println!("{context}");
    }
    Ok(())
}

fn cmd_session_show(config: &Config, id: &str) -> anyhow::Result<()> {
    let store = SessionStore::new(config.paths.sessions_dir())?;
    let session = store.load(&SessionId::from(id))?;
    println!("{}", serde_json::to_string_pretty(&session)?);
    Ok(())
}

fn cmd_session_clear(config: &Config, id: &str) -> anyhow::Result<()> {
    let store = SessionStore::new(config.paths.sessions_dir())?;
    if store.clear(&SessionId::from(id))? {
        println!("Cleared session {id}");
    } else {
        println!("No session {id}");
    }
    Ok(())
}

fn cmd_experience_search(config: &Config, query: &str, top_k: Option<usize>) -> anyhow::Result<()> {
    let index = Bm25Index::load(config.paths.experience_file(), experience_fields());
    let hits = index.search(query, top_k.unwrap_or(config.retrieval.top_k));
    if hits.is_empty() {
        println!("No matching experiences.");
    }
    for hit in hits {
        println!("#{} ({:.4}) {}", hit.id, hit.score, hit.text);
    }
    Ok(())
}

fn cmd_experience_list(config: &Config) -> anyhow::Result<()> {
    let store = ExperienceStore::new(config.paths.experience_file());
    for record in store.load_all() {
        println!("#{} [{}] {} -> {}", record.id, record.case_id, record.situation, record.action);
    }
    Ok(())
}

/// Formats run mode header text.
fn format_run_header(agent: &str, session_id: &SessionId) -> String {
    format!("Running {agent} (session {session_id})")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &Path) -> Config {
        let mut config = Config::default();
        config.paths.data_dir = dir.to_path_buf();
        config
    }

    #[test]
    fn build_registry_covers_every_builtin_profile() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config_in(dir.path());
        let llm: Arc<dyn LlmProvider> = Arc::new(OpenAiProvider::new("test-key"));
        let registry = build_registry(&config, llm).expect("registry");

        for name in config.agent_names() {
            let profile = config.profile(&name).expect("profile");
            for tool in profile.tools.iter().chain(&profile.terminal_tools) {
                assert!(registry.contains(tool), "{name} needs unregistered tool {tool}");
            }
        }
        assert_eq!(registry.tool_names().len(), 13);
    }

    #[test]
    fn build_runtime_rejects_unknown_agent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config_in(dir.path());
        let llm: Arc<dyn LlmProvider> = Arc::new(OpenAiProvider::new("test-key"));
        let registry = Arc::new(build_registry(&config, Arc::clone(&llm)).expect("registry"));
        assert!(build_runtime(&config, "ghost", llm, registry).is_err());
    }

    #[test]
    fn unusable_sessions_dir_is_an_error_not_a_panic() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config_in(dir.path());
        let sessions = config.paths.sessions_dir();
        std::fs::create_dir_all(sessions.parent().expect("parent")).expect("mkdir");
        std::fs::write(&sessions, b"not a directory").expect("write");

        let llm: Arc<dyn LlmProvider> = Arc::new(OpenAiProvider::new("test-key"));
        assert!(build_registry(&config, llm).is_err());
        assert!(cmd_session_show(&config, "case-1").is_err());
        assert!(cmd_session_clear(&config, "case-1").is_err());
    }

    #[test]
    fn session_commands_create_the_sessions_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config_in(dir.path());
        cmd_session_clear(&config, "case-1").expect("clear");
        cmd_session_show(&config, "case-1").expect("show");
        assert!(config.paths.sessions_dir().is_dir());
    }

    #[test]
    fn format_run_header_names_agent_and_session() {
        let header = format_run_header("simple_agent", &SessionId::from("case-1"));
        assert_eq!(header, "Running simple_agent (session case-1)");
    }

    #[test]
    fn cli_parses_batch_defaults() {
        let cli = Cli::try_parse_from(["clinic", "batch", "cases.jsonl"]).expect("parse");
        match cli.command {
            Commands::Batch {
                agent,
                all,
                concurrency,
                ..
            } => {
                assert_eq!(agent, "experience_extractor");
                assert!(!all);
                assert_eq!(concurrency, 5);
            }
            _ => panic!("expected batch"),
        }
    }
}
