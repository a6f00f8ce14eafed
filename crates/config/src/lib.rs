//! Configuration loading, validation, and management for refdesk.
//!
//! Loads configuration from `~/.refdesk/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.refdesk/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Chat-completions endpoint used by the model-backed oracles
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Reasoning loop budgets
    #[serde(default)]
    pub agent: AgentConfig,

    /// The external tool process
    #[serde(default)]
    pub tool_server: ToolServerConfig,

    /// Event stream settings
    #[serde(default)]
    pub stream: StreamConfig,

    /// Intent guardrail settings
    #[serde(default)]
    pub guardrail: GuardrailConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub temperature: f32,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}
fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            model: default_model(),
            temperature: 0.0,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum reasoning steps per turn
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Extra attempts for a tool call that timed out or lost its process
    #[serde(default = "default_tool_retry_budget")]
    pub tool_retry_budget: u32,
}

fn default_max_iterations() -> usize {
    10
}
fn default_tool_retry_budget() -> u32 {
    1
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            tool_retry_budget: default_tool_retry_budget(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolServerConfig {
    /// Program that starts the tool server
    #[serde(default = "default_server_command")]
    pub command: String,

    #[serde(default = "default_server_args")]
    pub args: Vec<String>,

    /// Working directory for the server process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    /// Pass the agent's environment through to the server
    #[serde(default = "default_true")]
    pub inherit_env: bool,

    /// Bounded wait for a single tool invocation
    #[serde(default = "default_invocation_timeout_secs")]
    pub invocation_timeout_secs: u64,

    /// Dispatch one invocation at a time
    #[serde(default)]
    pub serialize_dispatch: bool,
}

fn default_server_command() -> String {
    "uv".into()
}
fn default_server_args() -> Vec<String> {
    vec!["run".into(), "fastmcp".into(), "run".into(), "server.py".into()]
}
fn default_invocation_timeout_secs() -> u64 {
    30
}

impl ToolServerConfig {
    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_secs(self.invocation_timeout_secs)
    }
}

impl Default for ToolServerConfig {
    fn default() -> Self {
        Self {
            command: default_server_command(),
            args: default_server_args(),
            working_dir: None,
            inherit_env: true,
            invocation_timeout_secs: default_invocation_timeout_secs(),
            serialize_dispatch: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Events buffered per session before the producer blocks
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

fn default_buffer_capacity() -> usize {
    64
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
        }
    }
}

/// Which guardrail oracle to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailMode {
    /// Ask the configured model for a YES/NO intent decision
    #[default]
    Model,
    /// Deterministic keyword rules, no model call
    Keywords,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailConfig {
    #[serde(default)]
    pub mode: GuardrailMode,

    #[serde(default = "default_guardrail_timeout_secs")]
    pub timeout_secs: u64,

    /// Vocabulary for keyword mode
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,

    /// Shown to the user when a question is rejected
    #[serde(default = "default_rejection_message")]
    pub rejection_message: String,
}

fn default_guardrail_timeout_secs() -> u64 {
    15
}

fn default_keywords() -> Vec<String> {
    [
        "bond", "bonds", "issuer", "issuers", "isin", "isins", "figi", "cusip", "lei",
        "rating", "ratings", "coupon", "maturity", "treasury", "treasuries", "credit",
        "yield", "instrument", "instruments", "securities", "debt", "financial",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_rejection_message() -> String {
    "Your query does not appear to be related to financial reference data. \
     Please ask about bonds, issuers, or credit ratings."
        .into()
}

impl GuardrailConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            mode: GuardrailMode::default(),
            timeout_secs: default_guardrail_timeout_secs(),
            keywords: default_keywords(),
            rejection_message: default_rejection_message(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.refdesk/config.toml).
    ///
    /// Environment overrides:
    /// - `REFDESK_API_KEY`, then `OPENAI_API_KEY`
    /// - `REFDESK_MODEL`
    /// - `REFDESK_API_URL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.provider.api_key.is_none() {
            self.provider.api_key = lookup("REFDESK_API_KEY").or_else(|| lookup("OPENAI_API_KEY"));
        }
        if let Some(model) = lookup("REFDESK_MODEL") {
            self.provider.model = model;
        }
        if let Some(url) = lookup("REFDESK_API_URL") {
            self.provider.api_url = url;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".refdesk")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }

        if self.stream.buffer_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "stream.buffer_capacity must be at least 1".into(),
            ));
        }

        if self.tool_server.invocation_timeout_secs == 0 || self.guardrail.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "timeouts must be greater than zero".into(),
            ));
        }

        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.guardrail.mode == GuardrailMode::Keywords && self.guardrail.keywords.is_empty() {
            return Err(ConfigError::ValidationError(
                "guardrail.keywords must not be empty in keywords mode".into(),
            ));
        }

        if self.tool_server.command.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "tool_server.command must not be empty".into(),
            ));
        }

        Ok(())
    }

    /// Whether the model endpoint still lacks an API key.
    pub fn needs_api_key(&self) -> bool {
        self.provider.api_key.is_none()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
