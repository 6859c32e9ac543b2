use agent::AgentProfile;
use proto::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::profiles::builtin_profiles;

/// Known OpenAI-compatible chat backends.
///
/// Each preset auto-configures `base_url` and supplies a default model ID so
/// that users only have to specify what differs from the preset defaults.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderPreset {
    /// OpenRouter – aggregates many providers. Default.
    #[default]
    OpenRouter,
    /// OpenAI API (api.openai.com).
    OpenAi,
    /// DeepSeek chat API.
    DeepSeek,
    /// Fully custom: set `base_url` and `model` manually.
    Custom,
}

impl ProviderPreset {
    /// Default model ID for the preset. Used when `LlmConfig::model` is empty.
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::OpenRouter => "openai/gpt-4o-mini",
            Self::OpenAi => "gpt-4o-mini",
            Self::DeepSeek => "deepseek-chat",
            Self::Custom => "",
        }
    }

    /// Auto-configured API base URL (`None` = use the SDK's built-in default).
    pub fn base_url(&self) -> Option<&'static str> {
        match self {
            Self::OpenRouter => Some("https://openrouter.ai/api/v1"),
            Self::OpenAi => None,
            Self::DeepSeek => Some("https://api.deepseek.com"),
            Self::Custom => None,
        }
    }

    /// Name of the provider-specific API key environment variable.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Self::OpenRouter => "OPENROUTER_API_KEY",
            Self::OpenAi | Self::Custom => "OPENAI_API_KEY",
            Self::DeepSeek => "DEEPSEEK_API_KEY",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenRouter => "openrouter",
            Self::OpenAi => "openai",
            Self::DeepSeek => "deepseek",
            Self::Custom => "custom",
        }
    }
}

/// Chat backend config.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: ProviderPreset,
    /// Model ID used by profiles that do not name one.
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    /// Explicit API base URL. Overrides the preset URL when non-empty.
    pub base_url: Option<String>,
}

impl LlmConfig {
    /// Returns the effective model ID.
    /// Falls back to the preset default when `model` is empty.
    pub fn effective_model(&self) -> &str {
        if self.model.is_empty() {
            self.provider.default_model()
        } else {
            &self.model
        }
    }

    /// Priority: explicit `base_url` field > preset auto-URL > `None`.
    pub fn effective_base_url(&self) -> Option<&str> {
        if let Some(url) = &self.base_url
            && !url.is_empty()
        {
            return Some(url.as_str());
        }
        self.provider.base_url()
    }
}

/// On-disk locations. Unset entries live under `data_dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    pub sessions_dir: Option<PathBuf>,
    pub experience_file: Option<PathBuf>,
    pub guideline_file: Option<PathBuf>,
    pub conversation_log: Option<PathBuf>,
    pub trajectory_dir: Option<PathBuf>,
}

fn default_data_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".clinic")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            sessions_dir: None,
            experience_file: None,
            guideline_file: None,
            conversation_log: None,
            trajectory_dir: None,
        }
    }
}

impl PathsConfig {
    fn or_data(&self, explicit: &Option<PathBuf>, default: &str) -> PathBuf {
        explicit.clone().unwrap_or_else(|| self.data_dir.join(default))
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.or_data(&self.sessions_dir, "sessions")
    }

    pub fn experience_file(&self) -> PathBuf {
        self.or_data(&self.experience_file, "diagnostic_experiences.json")
    }

    pub fn guideline_file(&self) -> PathBuf {
        self.or_data(&self.guideline_file, "medical_guidelines.json")
    }

    pub fn conversation_log(&self) -> PathBuf {
        self.or_data(&self.conversation_log, "conversation_log.json")
    }

    pub fn trajectory_dir(&self) -> PathBuf {
        self.or_data(&self.trajectory_dir, "trajectories")
    }
}

fn default_bash_timeout() -> u64 {
    30
}

/// Built-in tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Key for `brave_search`; also read from `BRAVE_API_KEY`.
    #[serde(default)]
    pub brave_api_key: String,
    #[serde(default = "default_bash_timeout")]
    pub bash_timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            brave_api_key: String::new(),
            bash_timeout_secs: default_bash_timeout(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

fn default_session_capacity() -> usize {
    retrieval::DEFAULT_CAPACITY
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Results shown by `experience search`.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_session_capacity")]
    pub session_capacity: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            session_capacity: default_session_capacity(),
        }
    }
}

/// Top-level application config (`clinic.toml`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// Profiles keyed by agent name; these replace built-ins of the same name.
    #[serde(default)]
    pub agents: BTreeMap<String, AgentProfile>,
}

impl Config {
    /// Loads configuration from explicit path, fallback locations, and env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = path.map(|p| p.to_path_buf()).or_else(|| {
            // Look in current dir, then home dir
            let cwd = std::env::current_dir().ok()?.join("clinic.toml");
            if cwd.exists() {
                return Some(cwd);
            }
            let home = std::env::var("HOME").ok()?;
            let home_config = PathBuf::from(home).join(".clinic").join("config.toml");
            if home_config.exists() {
                return Some(home_config);
            }
            None
        });
        debug!(path = ?config_path, "Config file resolved");

        let mut config = if let Some(path) = config_path {
            let content = std::fs::read_to_string(&path).map_err(ConfigError::Io)?;
            toml::from_str(&content).map_err(|e| ConfigError::Toml(e.to_string()))?
        } else {
            Config::default()
        };

        // Environment variable overrides
        if let Ok(key) = std::env::var("CLINIC_API_KEY") {
            config.llm.api_key = key;
        }
        if let Ok(model) = std::env::var("CLINIC_MODEL") {
            config.llm.model = model;
        }
        if let Ok(url) = std::env::var("CLINIC_BASE_URL") {
            config.llm.base_url = Some(url);
        }
        if let Ok(dir) = std::env::var("CLINIC_DATA_DIR") {
            config.paths.data_dir = PathBuf::from(dir);
        }
        if let Ok(key) = std::env::var("BRAVE_API_KEY")
            && config.tools.brave_api_key.is_empty()
        {
            config.tools.brave_api_key = key;
        }

        debug!(
            provider = %config.llm.provider.name(),
            model = %config.llm.effective_model(),
            base_url = ?config.llm.effective_base_url(),
            data_dir = %config.paths.data_dir.display(),
            "Config loaded"
        );
        Ok(config)
    }

    /// Resolves the API key to use for the configured provider.
    ///
    /// Priority:
    /// 1. `llm.api_key` in config file (or `CLINIC_API_KEY` applied at load time)
    /// 2. Provider-specific environment variable (e.g. `DEEPSEEK_API_KEY`)
    /// 3. `OPENROUTER_API_KEY` (fallback)
    pub fn resolve_api_key(&self) -> String {
        if !self.llm.api_key.is_empty() {
            debug!(source = "config", provider = %self.llm.provider.name(), "API key resolved");
            return self.llm.api_key.clone();
        }

        let env_var = self.llm.provider.api_key_env();
        if let Ok(key) = std::env::var(env_var)
            && !key.is_empty()
        {
            debug!(source = "env", env_var = %env_var, "API key resolved");
            return key;
        }

        let fallback = std::env::var("OPENROUTER_API_KEY").unwrap_or_default();
        if fallback.is_empty() {
            warn!(provider = %self.llm.provider.name(), "No API key found from any source");
        } else {
            debug!(source = "fallback", "API key resolved from OPENROUTER_API_KEY");
        }
        fallback
    }

    /// Profile for `name`: configured entries win over built-ins. An empty
    /// model falls back to the `[llm]` model.
    pub fn profile(&self, name: &str) -> Result<AgentProfile, ConfigError> {
        let mut profile = self
            .agents
            .get(name)
            .cloned()
            .or_else(|| builtin_profiles().remove(name))
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "agent".to_string(),
                reason: format!("Agent '{name}' not found in config"),
            })?;
        if profile.name.is_empty() {
            profile.name = name.to_string();
        }
        if profile.model.is_empty() {
            profile.model = self.llm.effective_model().to_string();
        }
        Ok(profile)
    }

    /// Names of every agent available, built-in or configured.
    pub fn agent_names(&self) -> Vec<String> {
        let mut names: Vec<String> = builtin_profiles().into_keys().collect();
        for name in self.agents.keys() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{remove_env_var, set_env_var, with_locked_env};

    fn write_file(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(path, content).expect("write config");
    }

    const ENV_KEYS: [&str; 8] = [
        "CLINIC_API_KEY",
        "CLINIC_MODEL",
        "CLINIC_BASE_URL",
        "CLINIC_DATA_DIR",
        "BRAVE_API_KEY",
        "OPENROUTER_API_KEY",
        "DEEPSEEK_API_KEY",
        "OPENAI_API_KEY",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            remove_env_var(key);
        }
    }

    #[test]
    fn default_config_has_expected_values() {
        let cfg = Config::default();
        assert_eq!(cfg.llm.provider, ProviderPreset::OpenRouter);
        assert_eq!(cfg.llm.effective_model(), "openai/gpt-4o-mini");
        assert_eq!(cfg.llm.effective_base_url(), Some("https://openrouter.ai/api/v1"));
        assert_eq!(cfg.tools.bash_timeout_secs, 30);
        assert_eq!(cfg.retrieval.session_capacity, 30);
        assert!(cfg.paths.sessions_dir().ends_with(".clinic/sessions"));
    }

    #[test]
    fn load_reads_explicit_file_path() {
        with_locked_env(|| {
            clear_env();
            let tmp = tempfile::tempdir().expect("tempdir");
            let config_path = tmp.path().join("clinic.toml");
            write_file(
                &config_path,
                r#"
[llm]
provider = "deepseek"
api_key = "from_file"

[paths]
data_dir = "/tmp/clinic-data"
experience_file = "/tmp/shared/experiences.json"

[tools]
bash_timeout_secs = 5

[retrieval]
top_k = 3

[agents.triage]
system_prompt = "Triage the patient."
tools = ["think", "final_result"]
terminal_tools = ["final_result"]
max_turns = 4
"#,
            );
            let cfg = Config::load(Some(&config_path)).expect("config should parse");
            assert_eq!(cfg.llm.provider, ProviderPreset::DeepSeek);
            assert_eq!(cfg.llm.effective_model(), "deepseek-chat");
            assert_eq!(cfg.llm.effective_base_url(), Some("https://api.deepseek.com"));
            assert_eq!(cfg.resolve_api_key(), "from_file");
            assert_eq!(cfg.paths.sessions_dir(), PathBuf::from("/tmp/clinic-data/sessions"));
            assert_eq!(
                cfg.paths.experience_file(),
                PathBuf::from("/tmp/shared/experiences.json")
            );
            assert_eq!(cfg.tools.bash_timeout_secs, 5);
            assert_eq!(cfg.retrieval.top_k, 3);

            let triage = cfg.profile("triage").expect("triage profile");
            assert_eq!(triage.name, "triage");
            assert_eq!(triage.model, "deepseek-chat");
            assert_eq!(triage.max_turns, 4);
            assert!(cfg.agent_names().contains(&"triage".to_string()));
        });
    }

    #[test]
    fn load_returns_toml_error_for_invalid_content() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("bad.toml");
        write_file(&path, "[llm\nprovider = ");
        let err = Config::load(Some(&path)).expect_err("invalid toml");
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn load_applies_env_overrides() {
        with_locked_env(|| {
            clear_env();
            set_env_var("CLINIC_API_KEY", "env-api");
            set_env_var("CLINIC_MODEL", "env-model");
            set_env_var("CLINIC_BASE_URL", "http://localhost:8000/v1");
            set_env_var("CLINIC_DATA_DIR", "/tmp/env-clinic");
            set_env_var("BRAVE_API_KEY", "brave");

            let tmp = tempfile::tempdir().expect("tempdir");
            let path = tmp.path().join("empty.toml");
            write_file(&path, "");
            let cfg = Config::load(Some(&path)).expect("config load");
            assert_eq!(cfg.llm.api_key, "env-api");
            assert_eq!(cfg.llm.effective_model(), "env-model");
            assert_eq!(cfg.llm.effective_base_url(), Some("http://localhost:8000/v1"));
            assert_eq!(cfg.paths.trajectory_dir(), PathBuf::from("/tmp/env-clinic/trajectories"));
            assert_eq!(cfg.tools.brave_api_key, "brave");

            clear_env();
        });
    }

    #[test]
    fn resolve_api_key_uses_provider_env_then_openrouter_fallback() {
        with_locked_env(|| {
            clear_env();
            let mut cfg = Config::default();
            cfg.llm.provider = ProviderPreset::DeepSeek;

            set_env_var("DEEPSEEK_API_KEY", "provider-key");
            assert_eq!(cfg.resolve_api_key(), "provider-key");

            remove_env_var("DEEPSEEK_API_KEY");
            set_env_var("OPENROUTER_API_KEY", "router-key");
            assert_eq!(cfg.resolve_api_key(), "router-key");

            clear_env();
            assert_eq!(cfg.resolve_api_key(), "");
        });
    }

    #[test]
    fn configured_profile_replaces_builtin() {
        let mut cfg = Config::default();
        cfg.agents.insert(
            "simple_agent".to_string(),
            AgentProfile::new("", "Custom prompt").with_model("gpt-4.1"),
        );
        let profile = cfg.profile("simple_agent").expect("profile");
        assert_eq!(profile.system_prompt, "Custom prompt");
        assert_eq!(profile.model, "gpt-4.1");
        assert_eq!(profile.name, "simple_agent");
    }

    #[test]
    fn unknown_profile_is_an_error() {
        let err = Config::default().profile("nobody").expect_err("missing");
        assert!(err.to_string().contains("Agent 'nobody' not found"));
    }

    #[test]
    fn provider_presets_have_stable_names() {
        assert_eq!(ProviderPreset::OpenAi.base_url(), None);
        assert_eq!(ProviderPreset::Custom.default_model(), "");
        assert_eq!(ProviderPreset::OpenRouter.name(), "openrouter");
        let parsed: LlmConfig = toml::from_str(r#"provider = "openai""#).expect("parse");
        assert_eq!(parsed.provider, ProviderPreset::OpenAi);
    }
}
