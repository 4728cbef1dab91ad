use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::endpoint::{DEFAULT_BASE_URL, ModelReference, RuntimeEndpoint};
use crate::error::ConfigError;
use crate::installer::InstallStrategy;
use crate::supervisor::SupervisorSettings;

pub const CONFIG_FILE_NAME: &str = "readygate.toml";
pub const DEFAULT_MODEL: &str = "qwen2.5:0.5b";
pub const DEFAULT_INSTALL_SCRIPT_URL: &str = "https://ollama.com/install.sh";
/// Model used when the OpenAI provider is selected.
pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Default, Deserialize)]
pub struct ReadyGateConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub installer: InstallerConfig,
}

#[derive(Debug, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_binary")]
    pub binary: String,
    #[serde(default = "default_serve_args")]
    pub serve_args: Vec<String>,
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.into()
}
fn default_binary() -> String {
    "ollama".into()
}
fn default_serve_args() -> Vec<String> {
    vec!["serve".into()]
}
fn default_startup_timeout_secs() -> u64 {
    30
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_shutdown_grace_secs() -> u64 {
    10
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            binary: default_binary(),
            serve_args: default_serve_args(),
            startup_timeout_secs: default_startup_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model")]
    pub name: String,
    #[serde(default = "default_pull_timeout_secs")]
    pub pull_timeout_secs: u64,
}

fn default_model() -> String {
    DEFAULT_MODEL.into()
}
fn default_pull_timeout_secs() -> u64 {
    600
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model(),
            pull_timeout_secs: default_pull_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct InstallerConfig {
    #[serde(default = "default_script_url")]
    pub script_url: String,
    #[serde(default = "default_primary_timeout_secs")]
    pub primary_timeout_secs: u64,
    #[serde(default = "default_fallback_timeout_secs")]
    pub fallback_timeout_secs: u64,
    /// Script run as the fallback strategy. Without one, the fallback
    /// fetches the official script with wget instead of curl.
    pub fallback_script: Option<PathBuf>,
}

fn default_script_url() -> String {
    DEFAULT_INSTALL_SCRIPT_URL.into()
}
fn default_primary_timeout_secs() -> u64 {
    300
}
fn default_fallback_timeout_secs() -> u64 {
    600
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            script_url: default_script_url(),
            primary_timeout_secs: default_primary_timeout_secs(),
            fallback_timeout_secs: default_fallback_timeout_secs(),
            fallback_script: None,
        }
    }
}

impl ReadyGateConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load from `explicit` if given, else the first of `./readygate.toml`
    /// and `<config dir>/readygate/readygate.toml` that exists, else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let candidates = [
            Some(PathBuf::from(CONFIG_FILE_NAME)),
            dirs::config_dir().map(|d| d.join("readygate").join(CONFIG_FILE_NAME)),
        ];
        for path in candidates.into_iter().flatten() {
            if path.is_file() {
                tracing::debug!(path = %path.display(), "Loading config");
                return Self::from_file(&path);
            }
        }

        tracing::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Apply `OLLAMA_MODEL` and `READYGATE_BASE_URL` overrides.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(model) = non_empty(&lookup, "OLLAMA_MODEL") {
            self.model.name = model;
        }
        if let Some(base_url) = non_empty(&lookup, "READYGATE_BASE_URL") {
            self.runtime.base_url = base_url;
        }
    }

    pub fn endpoint(&self) -> RuntimeEndpoint {
        RuntimeEndpoint::new(&self.runtime.base_url)
    }

    pub fn model(&self) -> ModelReference {
        ModelReference::new(&self.model.name)
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.model.pull_timeout_secs)
    }

    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            binary: self.runtime.binary.clone(),
            serve_args: self.runtime.serve_args.clone(),
            startup_timeout: Duration::from_secs(self.runtime.startup_timeout_secs),
            poll_interval: Duration::from_millis(self.runtime.poll_interval_ms),
            shutdown_grace: Duration::from_secs(self.runtime.shutdown_grace_secs),
        }
    }

    /// Primary then fallback install strategy.
    pub fn install_strategies(&self) -> Vec<InstallStrategy> {
        let installer = &self.installer;
        let primary = InstallStrategy::official_script(
            &installer.script_url,
            Duration::from_secs(installer.primary_timeout_secs),
        );
        let fallback_timeout = Duration::from_secs(installer.fallback_timeout_secs);
        let fallback = match &installer.fallback_script {
            Some(path) => InstallStrategy::bundled_script(path, fallback_timeout),
            None => InstallStrategy::wget_script(&installer.script_url, fallback_timeout),
        };
        vec![primary, fallback]
    }
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).filter(|v| !v.trim().is_empty())
}

/// Where the caller should send chat-completion requests.
///
/// Remote providers are assumed ready and bypass the readiness gate.
#[derive(Clone, PartialEq, Eq)]
pub enum InferenceProvider {
    /// An externally hosted OpenAI-compatible endpoint.
    External {
        base_url: String,
        model: String,
        token: String,
    },
    OpenAi { model: String, api_key: String },
    Local {
        base_url: String,
        model: ModelReference,
    },
}

impl InferenceProvider {
    /// Pick a provider from the environment: `LLM_TOKEN` + `LLM_ENDPOINT` +
    /// `LLM_MODEL` first, then `USE_OPENAI=true` with `OPENAI_API_KEY`, and
    /// otherwise the local runtime.
    pub fn select(config: &ReadyGateConfig, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let token = non_empty(&lookup, "LLM_TOKEN");
        let endpoint = non_empty(&lookup, "LLM_ENDPOINT");
        let model = non_empty(&lookup, "LLM_MODEL");
        if let (Some(token), Some(base_url), Some(model)) = (token, endpoint, model) {
            return InferenceProvider::External {
                base_url,
                model,
                token,
            };
        }

        let use_openai = lookup("USE_OPENAI").is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));
        if use_openai {
            if let Some(api_key) = non_empty(&lookup, "OPENAI_API_KEY") {
                return InferenceProvider::OpenAi {
                    model: OPENAI_DEFAULT_MODEL.into(),
                    api_key,
                };
            }
            tracing::warn!("USE_OPENAI is set but OPENAI_API_KEY is missing, using the local runtime");
        }

        InferenceProvider::Local {
            base_url: config.endpoint().openai_base_url(),
            model: config.model(),
        }
    }

    pub fn from_env(config: &ReadyGateConfig) -> Self {
        Self::select(config, |key| std::env::var(key).ok())
    }

    pub fn needs_readiness_gate(&self) -> bool {
        matches!(self, InferenceProvider::Local { .. })
    }

    pub fn model_name(&self) -> &str {
        match self {
            InferenceProvider::External { model, .. } | InferenceProvider::OpenAi { model, .. } => model,
            InferenceProvider::Local { model, .. } => model.as_str(),
        }
    }
}

impl std::fmt::Debug for InferenceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InferenceProvider::External { base_url, model, .. } => f
                .debug_struct("External")
                .field("base_url", base_url)
                .field("model", model)
                .field("token", &"<redacted>")
                .finish(),
            InferenceProvider::OpenAi { model, .. } => f
                .debug_struct("OpenAi")
                .field("model", model)
                .field("api_key", &"<redacted>")
                .finish(),
            InferenceProvider::Local { base_url, model } => f
                .debug_struct("Local")
                .field("base_url", base_url)
                .field("model", model)
                .finish(),
        }
    }
}

impl std::fmt::Display for InferenceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InferenceProvider::External { base_url, model, .. } => {
                write!(f, "external model {model} via {base_url}")
            }
            InferenceProvider::OpenAi { model, .. } => write!(f, "OpenAI API ({model})"),
            InferenceProvider::Local { model, .. } => write!(f, "local runtime with model {model}"),
        }
    }
}
