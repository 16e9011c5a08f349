pub mod validation;

use serde::{Deserialize, Serialize};
use std::fmt;

use self::validation::validate_config;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Strategy used to pick one of several upstream endpoints per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EndpointSelection {
    #[default]
    RoundRobin,
    Random,
}

impl fmt::Display for EndpointSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointSelection::RoundRobin => write!(f, "round_robin"),
            EndpointSelection::Random => write!(f, "random"),
        }
    }
}

/// Token estimation strategy for usage blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TokenCounterKind {
    /// BPE tokenizer lookup by model name, falling back to `Chars`.
    #[default]
    Tiktoken,
    /// `ceil(bytes / 4)`.
    Chars,
    /// Whitespace-separated word count.
    Words,
}

impl fmt::Display for TokenCounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenCounterKind::Tiktoken => write!(f, "tiktoken"),
            TokenCounterKind::Chars => write!(f, "chars"),
            TokenCounterKind::Words => write!(f, "words"),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub base_path: String,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_http_pool_max_idle_per_host")]
    pub http_pool_max_idle_per_host: usize,
    #[serde(default = "default_http_pool_idle_timeout_secs")]
    pub http_pool_idle_timeout_secs: u64,
    #[serde(default)]
    pub http_use_env_proxy: bool,
    #[serde(default = "default_max_concurrent_upstream_requests")]
    pub max_concurrent_upstream_requests: usize,
    /// `None` lets tokio pick one worker per core.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_worker_threads: Option<usize>,
    #[serde(
        default = "default_runtime_max_blocking_threads",
        skip_serializing_if = "Option::is_none"
    )]
    pub runtime_max_blocking_threads: Option<usize>,
}

fn default_port() -> u16 {
    5000
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_timeout() -> u64 {
    180
}
fn default_http_pool_max_idle_per_host() -> usize {
    16
}
fn default_http_pool_idle_timeout_secs() -> u64 {
    15
}
fn default_max_concurrent_upstream_requests() -> usize {
    64
}
#[allow(clippy::unnecessary_wraps)]
fn default_runtime_max_blocking_threads() -> Option<usize> {
    Some(8)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            base_path: String::new(),
            timeout: default_timeout(),
            http_pool_max_idle_per_host: default_http_pool_max_idle_per_host(),
            http_pool_idle_timeout_secs: default_http_pool_idle_timeout_secs(),
            http_use_env_proxy: false,
            max_concurrent_upstream_requests: default_max_concurrent_upstream_requests(),
            runtime_worker_threads: None,
            runtime_max_blocking_threads: default_runtime_max_blocking_threads(),
        }
    }
}

/// Upstream chat service configuration.
///
/// `next_action` and `cookie` may be given inline or through a file path;
/// files are read once by [`UpstreamConfig::resolve_credentials`] at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub endpoint_selection: EndpointSelection,
    #[serde(default)]
    pub next_action: Option<String>,
    #[serde(default)]
    pub next_action_file: Option<String>,
    #[serde(default)]
    pub cookie: Option<String>,
    #[serde(default)]
    pub cookie_file: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_accept_language")]
    pub accept_language: String,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub expected_content_type: Option<String>,
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36".to_string()
}
fn default_accept_language() -> String {
    "zh-CN,zh;q=0.9".to_string()
}

/// Upstream credentials resolved from inline values or files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamCredentials {
    pub next_action: String,
    pub cookie: Option<String>,
}

impl UpstreamConfig {
    /// Resolve `next-action` and cookie values, reading files where configured.
    ///
    /// Inline values win over files. Values are trimmed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when a configured file cannot be read, or
    /// [`ConfigError::Validation`] when no non-empty `next_action` is available.
    pub fn resolve_credentials(&self) -> Result<UpstreamCredentials, ConfigError> {
        let next_action =
            read_inline_or_file(self.next_action.as_deref(), self.next_action_file.as_deref())?
                .ok_or_else(|| {
                    ConfigError::Validation(
                        "upstream.next_action or upstream.next_action_file is required".into(),
                    )
                })?;
        let cookie = read_inline_or_file(self.cookie.as_deref(), self.cookie_file.as_deref())?;
        Ok(UpstreamCredentials {
            next_action,
            cookie,
        })
    }
}

fn read_inline_or_file(
    inline: Option<&str>,
    path: Option<&str>,
) -> Result<Option<String>, ConfigError> {
    let value = match (inline, path) {
        (Some(value), _) => value.trim().to_string(),
        (None, Some(path)) => std::fs::read_to_string(path)?.trim().to_string(),
        (None, None) => return Ok(None),
    };
    Ok(if value.is_empty() { None } else { Some(value) })
}

/// One entry of the model catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Caller-visible model name.
    pub name: String,
    pub provider: String,
    /// Identifier sent to the upstream service.
    pub upstream_model: String,
}

impl ModelEntry {
    fn new(name: &str, provider: &str, upstream_model: &str) -> Self {
        Self {
            name: name.to_string(),
            provider: provider.to_string(),
            upstream_model: upstream_model.to_string(),
        }
    }
}

#[must_use]
pub fn default_models() -> Vec<ModelEntry> {
    vec![
        ModelEntry::new("gpt-4-turbo-2024-04-09", "openai", "gpt-4-turbo-2024-04-09"),
        ModelEntry::new(
            "gemini-1.5-pro-exp-0801",
            "google",
            "models/gemini-1.5-pro-exp-0801",
        ),
        ModelEntry::new(
            "Meta-Llama-3.1-70B-Instruct-Turbo",
            "togetherai",
            "meta.llama3-1-70b-instruct-v1:0",
        ),
        ModelEntry::new(
            "Meta-Llama-3.1-405B-Instruct-Turbo",
            "togetherai",
            "meta.llama3-1-405b-instruct-v1:0",
        ),
        ModelEntry::new(
            "llama-3.1-sonar-large-128k-online",
            "perplexity",
            "llama-3.1-sonar-large-128k-online",
        ),
        ModelEntry::new(
            "gemini-1.5-pro-latest",
            "google",
            "models/gemini-1.5-pro-latest",
        ),
        ModelEntry::new(
            "claude-3-5-sonnet-20240620",
            "anthropic",
            "anthropic.claude-3-5-sonnet-20240620-v1:0",
        ),
        ModelEntry::new(
            "claude-3-haiku-20240307",
            "anthropic",
            "anthropic.claude-3-haiku-20240307-v1:0",
        ),
        ModelEntry::new("gpt-4o-mini", "openai", "gpt-4o-mini"),
        ModelEntry::new("gpt-4o", "openai", "gpt-4o"),
        ModelEntry::new(
            "mistral-large-2407",
            "mistral",
            "mistral.mistral-large-2407-v1:0",
        ),
    ]
}

/// Client authentication configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientAuthConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub allowed_keys: Vec<String>,
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub token_counter: TokenCounterKind,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default = "default_temperature")]
    pub default_temperature: f64,
    #[serde(default = "default_top_p")]
    pub default_top_p: f64,
}

fn default_log_level() -> String {
    "INFO".to_string()
}
fn default_temperature() -> f64 {
    0.8
}
fn default_top_p() -> f64 {
    1.0
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            token_counter: TokenCounterKind::default(),
            system_prompt: None,
            default_temperature: default_temperature(),
            default_top_p: default_top_p(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    #[serde(default = "default_models")]
    pub models: Vec<ModelEntry>,
    #[serde(default)]
    pub client_authentication: ClientAuthConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] or [`ConfigError::Validation`].
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}
