use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::engine::OpenAiEngineConfig;
use crate::tools::WebToolsConfig;
use crate::workflow::RunOptions;
use crate::{ResearchError, SecretValue, require_env};

const DEFAULT_CONFIG_PATH: &str = "researchflow.toml";
const CONFIG_PATH_ENV: &str = "RESEARCHFLOW_CONFIG";

/// Upper bound accepted for `workflow.max_iterations`.
pub const MAX_RESEARCH_ITERATIONS: u32 = 5;

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub workflow: WorkflowConfig,
    pub tools: ToolsConfig,
    pub sessions: SessionsConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Resolve the configured LLM secret value (from environment only).
    pub fn llm_api_key(&self) -> Result<SecretValue, ResearchError> {
        require_env(self.llm.api_key_env())
    }

    pub fn engine_config(&self) -> OpenAiEngineConfig {
        OpenAiEngineConfig {
            base_url: self.llm.base_url().unwrap_or_default().to_string(),
            model: self.llm.model.clone(),
            temperature: self.llm.temperature,
            timeout: Duration::from_millis(self.llm.timeout_ms),
        }
    }

    pub fn web_tools_config(&self) -> WebToolsConfig {
        WebToolsConfig {
            search_endpoint: self.tools.search_endpoint.clone(),
            scrape_max_chars: self.tools.scrape_max_chars,
            request_timeout: Duration::from_millis(self.tools.request_timeout_ms),
        }
    }

    /// Run options seeded from the `[workflow]` section.
    pub fn run_options(&self) -> RunOptions {
        let mut options = RunOptions::new()
            .with_max_iterations(self.workflow.max_iterations)
            .with_fact_check_max_iterations(self.workflow.fact_check_max_iterations);
        if let Some(ms) = self.workflow.run_timeout_ms {
            options = options.with_timeout(Duration::from_millis(ms));
        }
        options
    }
}

/// Helper to load configuration with guard rails.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a provided path or discoverable defaults.
    ///
    /// Resolution order:
    /// 1. Explicit `path` argument.
    /// 2. `RESEARCHFLOW_CONFIG` environment variable.
    /// 3. `researchflow.toml` in the current working directory, if present.
    ///
    /// When nothing is found the built-in defaults are used.
    pub fn load(path: Option<PathBuf>) -> Result<Config, ResearchError> {
        let config = match resolve_path(path) {
            Some(candidate) => {
                let raw = fs::read_to_string(&candidate)
                    .map_err(|err| ResearchError::config_io(candidate.clone(), err))?;
                Self::parse(&raw)?
            }
            None => Config::default(),
        };

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Config, ResearchError> {
        toml::from_str(raw).map_err(|err| ResearchError::InvalidConfiguration(err.to_string()))
    }

    pub fn validate(config: &Config) -> Result<(), ResearchError> {
        if config.llm.base_url().is_none_or(|url| url.trim().is_empty()) {
            return Err(ResearchError::InvalidConfiguration(format!(
                "llm.base_url is required for provider '{}'",
                config.llm.provider.as_str()
            )));
        }
        if config.llm.api_key_env().trim().is_empty() {
            return Err(ResearchError::InvalidConfiguration(
                "llm.api_key_env must reference an environment variable".into(),
            ));
        }
        Self::validate_max_iterations("workflow.max_iterations", config.workflow.max_iterations)?;
        if config.workflow.max_concurrent_runs == 0 {
            return Err(ResearchError::InvalidConfiguration(
                "workflow.max_concurrent_runs must be at least 1".into(),
            ));
        }
        if config.tools.scrape_max_chars == 0 {
            return Err(ResearchError::InvalidConfiguration(
                "tools.scrape_max_chars must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl ConfigLoader {
    /// Research turns must fall within `1..=MAX_RESEARCH_ITERATIONS`.
    pub fn validate_max_iterations(field: &str, value: u32) -> Result<(), ResearchError> {
        if !(1..=MAX_RESEARCH_ITERATIONS).contains(&value) {
            return Err(ResearchError::InvalidConfiguration(format!(
                "{field} must be between 1 and {MAX_RESEARCH_ITERATIONS}"
            )));
        }
        Ok(())
    }
}

fn resolve_path(path: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = path {
        return Some(path);
    }

    if let Ok(from_env) = env::var(CONFIG_PATH_ENV) {
        if !from_env.trim().is_empty() {
            return Some(PathBuf::from(from_env));
        }
    }

    let default = Path::new(DEFAULT_CONFIG_PATH);
    default.exists().then(|| default.to_path_buf())
}

/// Which OpenAI-compatible endpoint family the engine talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[default]
    Groq,
    Openai,
    /// Any other chat-completions gateway; `base_url` must be set.
    OpenaiCompatible,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Groq => "groq",
            Self::Openai => "openai",
            Self::OpenaiCompatible => "openai_compatible",
        }
    }

    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            Self::Groq => Some("https://api.groq.com/openai/v1"),
            Self::Openai => Some("https://api.openai.com/v1"),
            Self::OpenaiCompatible => None,
        }
    }

    pub fn default_api_key_env(&self) -> &'static str {
        match self {
            Self::Groq => "GROQ_API_KEY",
            Self::Openai | Self::OpenaiCompatible => "OPENAI_API_KEY",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub model: String,
    /// Overrides the provider's endpoint.
    pub base_url: Option<String>,
    /// Overrides the provider's API key variable.
    pub api_key_env: Option<String>,
    pub temperature: f32,
    pub timeout_ms: u64,
}

impl LlmConfig {
    pub fn base_url(&self) -> Option<&str> {
        self.base_url
            .as_deref()
            .or_else(|| self.provider.default_base_url())
    }

    pub fn api_key_env(&self) -> &str {
        self.api_key_env
            .as_deref()
            .unwrap_or_else(|| self.provider.default_api_key_env())
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        let engine = OpenAiEngineConfig::default();
        Self {
            provider: LlmProvider::default(),
            model: engine.model,
            base_url: None,
            api_key_env: None,
            temperature: engine.temperature,
            timeout_ms: engine.timeout.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub max_iterations: u32,
    pub fact_check_max_iterations: u32,
    pub max_concurrent_runs: usize,
    pub run_timeout_ms: Option<u64>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_iterations: 2,
            fact_check_max_iterations: 1,
            max_concurrent_runs: 4,
            run_timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub search_endpoint: String,
    pub scrape_max_chars: usize,
    pub request_timeout_ms: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        let web = WebToolsConfig::default();
        Self {
            search_endpoint: web.search_endpoint,
            scrape_max_chars: web.scrape_max_chars,
            request_timeout_ms: web.request_timeout.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    pub dir: PathBuf,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/sessions"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = ConfigLoader::parse(
            r#"
            [llm]
            model = "llama-3.3-70b-versatile"

            [workflow]
            max_iterations = 3
            run_timeout_ms = 90000
            "#,
        )
        .unwrap();

        assert_eq!(config.llm.model, "llama-3.3-70b-versatile");
        assert_eq!(config.llm.api_key_env(), "GROQ_API_KEY");
        assert_eq!(
            config.engine_config().base_url,
            OpenAiEngineConfig::default().base_url
        );
        assert_eq!(config.workflow.fact_check_max_iterations, 1);
        assert_eq!(config.tools.scrape_max_chars, 1000);

        let options = config.run_options();
        assert_eq!(options.max_iterations, 3);
        assert_eq!(options.timeout, Some(Duration::from_secs(90)));
    }

    #[test]
    fn iteration_bounds_are_validated() {
        let mut config = Config::default();
        config.workflow.max_iterations = 6;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ResearchError::InvalidConfiguration(_))
        ));

        config.workflow.max_iterations = 5;
        assert!(ConfigLoader::validate(&config).is_ok());

        assert!(ConfigLoader::validate_max_iterations("--max-iterations", 0).is_err());
        assert!(ConfigLoader::validate_max_iterations("--max-iterations", 6).is_err());
        assert!(ConfigLoader::validate_max_iterations("--max-iterations", 1).is_ok());
    }

    #[test]
    fn provider_selects_endpoint_and_key() {
        let config = ConfigLoader::parse(
            r#"
            [llm]
            provider = "openai"
            model = "gpt-4o-mini"
            "#,
        )
        .unwrap();
        assert!(ConfigLoader::validate(&config).is_ok());
        assert_eq!(config.engine_config().base_url, "https://api.openai.com/v1");
        assert_eq!(config.llm.api_key_env(), "OPENAI_API_KEY");

        let gateway = ConfigLoader::parse(
            r#"
            [llm]
            provider = "openai_compatible"
            base_url = "http://localhost:8080/v1"
            api_key_env = "LOCAL_LLM_KEY"
            "#,
        )
        .unwrap();
        assert!(ConfigLoader::validate(&gateway).is_ok());
        assert_eq!(gateway.engine_config().base_url, "http://localhost:8080/v1");
        assert_eq!(gateway.llm.api_key_env(), "LOCAL_LLM_KEY");
    }

    #[test]
    fn custom_provider_requires_base_url() {
        let config = ConfigLoader::parse("[llm]\nprovider = \"openai_compatible\"\n").unwrap();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ResearchError::InvalidConfiguration(_))
        ));
        assert!(ConfigLoader::parse("[llm]\nprovider = \"mystery\"\n").is_err());
    }

    #[test]
    fn missing_explicit_file_is_an_io_error() {
        let err = ConfigLoader::load(Some(PathBuf::from("/nonexistent/researchflow.toml")))
            .unwrap_err();
        assert!(matches!(err, ResearchError::ConfigIo { .. }));
    }
}
