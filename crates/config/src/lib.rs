//! Configuration loading, validation, and management for kbrelay.
//!
//! Loads configuration from `~/.kbrelay/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.kbrelay/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Generation backend connection
    #[serde(default)]
    pub backend: BackendConfig,

    /// Retry, timeout, and resegmentation settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Client delivery settings
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Analytics hand-off
    #[serde(default)]
    pub analytics: AnalyticsConfig,

    /// HTTP gateway
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_url")]
    pub base_url: String,

    #[serde(default = "default_agent_id")]
    pub agent_id: String,

    #[serde(default = "default_agent_alias_id")]
    pub agent_alias_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_true")]
    pub enable_trace: bool,
}

fn default_backend_url() -> String {
    "http://127.0.0.1:8900".into()
}
fn default_agent_id() -> String {
    "default-agent".into()
}
fn default_agent_alias_id() -> String {
    "live".into()
}
fn default_request_timeout() -> u64 {
    120
}
fn default_true() -> bool {
    true
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            agent_id: default_agent_id(),
            agent_alias_id: default_agent_alias_id(),
            api_key: None,
            request_timeout_secs: default_request_timeout(),
            enable_trace: true,
        }
    }
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("base_url", &self.base_url)
            .field("agent_id", &self.agent_id)
            .field("agent_alias_id", &self.agent_alias_id)
            .field("api_key", &redact(&self.api_key))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("enable_trace", &self.enable_trace)
            .finish()
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Invocation attempts before giving up (retry budget).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Idle timeout while waiting for the next backend event. 0 disables it.
    #[serde(default = "default_event_timeout")]
    pub event_timeout_secs: u64,

    /// Longest sentence delivered as a single piece.
    #[serde(default = "default_max_sentence_chars")]
    pub max_sentence_chars: usize,

    /// Words per piece when falling back to word grouping.
    #[serde(default = "default_words_per_piece")]
    pub words_per_piece: usize,
}

fn default_max_attempts() -> u32 {
    2
}
fn default_backoff_initial_ms() -> u64 {
    200
}
fn default_backoff_max_ms() -> u64 {
    2_000
}
fn default_event_timeout() -> u64 {
    60
}
fn default_max_sentence_chars() -> usize {
    100
}
fn default_words_per_piece() -> usize {
    8
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            event_timeout_secs: default_event_timeout(),
            max_sentence_chars: default_max_sentence_chars(),
            words_per_piece: default_words_per_piece(),
        }
    }
}

impl OrchestratorConfig {
    /// `None` when the idle timeout is disabled.
    pub fn event_timeout(&self) -> Option<Duration> {
        (self.event_timeout_secs > 0).then(|| Duration::from_secs(self.event_timeout_secs))
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Channel identifiers with this prefix belong to test harnesses;
    /// sends to them are logged and skipped.
    #[serde(default = "default_synthetic_prefix")]
    pub synthetic_prefix: String,

    /// Callback endpoint for connection pushes. Empty = in-process connections only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_endpoint: Option<String>,

    /// Shared secret used to sign callback pushes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_secret: Option<String>,
}

fn default_synthetic_prefix() -> String {
    "mock-".into()
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            synthetic_prefix: default_synthetic_prefix(),
            connection_endpoint: None,
            signing_secret: None,
        }
    }
}

impl std::fmt::Debug for DeliveryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryConfig")
            .field("synthetic_prefix", &self.synthetic_prefix)
            .field("connection_endpoint", &self.connection_endpoint)
            .field("signing_secret", &redact(&self.signing_secret))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP endpoint receiving analytics records. Absent = log only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Origins allowed by CORS.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

fn default_port() -> u16 {
    8787
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:5173".into()]
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit logs as JSON lines.
    #[serde(default)]
    pub json: bool,
}

impl AppConfig {
    /// Load configuration from the default path (~/.kbrelay/config.toml).
    ///
    /// Environment variables override file values:
    /// - `KBRELAY_BACKEND_URL`
    /// - `KBRELAY_AGENT_ID`
    /// - `KBRELAY_AGENT_ALIAS_ID`
    /// - `KBRELAY_API_KEY`
    /// - `KBRELAY_ANALYTICS_URL`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(&Self::config_path())
    }

    /// Load from `path`, then apply environment overrides and validate.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::read_file(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, without env overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::read_file(path)?;
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Apply overrides from an environment lookup.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("KBRELAY_BACKEND_URL") {
            self.backend.base_url = url;
        }
        if let Some(id) = lookup("KBRELAY_AGENT_ID") {
            self.backend.agent_id = id;
        }
        if let Some(alias) = lookup("KBRELAY_AGENT_ALIAS_ID") {
            self.backend.agent_alias_id = alias;
        }
        if self.backend.api_key.is_none() {
            self.backend.api_key = lookup("KBRELAY_API_KEY");
        }
        if let Some(url) = lookup("KBRELAY_ANALYTICS_URL") {
            self.analytics.endpoint = Some(url);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".kbrelay")
    }

    /// Default config file path.
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "backend.base_url must not be empty".into(),
            ));
        }
        if self.backend.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "backend.request_timeout_secs must be at least 1".into(),
            ));
        }

        let orch = &self.orchestrator;
        if orch.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.max_attempts must be at least 1".into(),
            ));
        }
        if orch.words_per_piece == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.words_per_piece must be at least 1".into(),
            ));
        }
        if orch.max_sentence_chars == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.max_sentence_chars must be at least 1".into(),
            ));
        }
        if orch.backoff_initial_ms > orch.backoff_max_ms {
            return Err(ConfigError::ValidationError(
                "orchestrator.backoff_initial_ms must not exceed backoff_max_ms".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
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
