use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{CtxFilterError, Result};

/// Main configuration structure for ctxfilter
///
/// Loaded once at startup and shared read-only (behind an `Arc`) with every
/// request handler.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP proxy configuration
    #[serde(default)]
    pub proxy: ProxyConfig,
    /// System prompt filtering
    #[serde(default)]
    pub filter: FilterConfig,
    /// Tool list pruning
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Context window negotiation
    #[serde(default)]
    pub context: ContextConfig,
    /// Before/after payload persistence
    #[serde(default)]
    pub audit: AuditConfig,
}

impl Config {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| CtxFilterError::Config(format!("Failed to parse config: {e}")))
    }

    /// Read and parse a configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CtxFilterError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load the config from an explicit path, or from the first default location
    /// that exists, falling back to built-in defaults.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            tracing::info!("Loading config from: {}", path.display());
            return Self::from_file(path);
        }

        for path in default_config_paths() {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(&path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Config::default())
    }
}

fn default_config_paths() -> Vec<PathBuf> {
    [
        dirs::home_dir().map(|h| h.join(".ctxfilter").join("config.toml")),
        dirs::config_dir().map(|c| c.join("ctxfilter").join("config.toml")),
        Some(PathBuf::from("config.toml")),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// HTTP proxy server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Address to listen on (e.g., "127.0.0.1:11435")
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Base URL of the model server requests are relayed to
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,
    /// Upstream request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Path prefixes whose JSON bodies go through the filter pipeline
    #[serde(default = "default_chat_routes")]
    pub chat_routes: Vec<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            upstream_url: default_upstream_url(),
            timeout_secs: default_timeout_secs(),
            chat_routes: default_chat_routes(),
        }
    }
}

impl ProxyConfig {
    /// Whether requests to `path` should be decoded and filtered
    pub fn is_chat_route(&self, path: &str) -> bool {
        self.chat_routes
            .iter()
            .any(|route| !route.is_empty() && path.starts_with(route.as_str()))
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:11435".to_string()
}

fn default_upstream_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_chat_routes() -> Vec<String> {
    vec!["/v1/chat/completions".to_string(), "/api/chat".to_string()]
}

/// System prompt filtering configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    /// Master switch for system prompt rewriting
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Model name fragments that mark a model as small (case-insensitive)
    #[serde(default = "default_small_models")]
    pub small_models: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            small_models: default_small_models(),
        }
    }
}

fn default_small_models() -> Vec<String> {
    ["llama3.2:1b", "llama3.2-1b", "qwen2.5:1.5b", "qwen2.5-1.5b"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Tool list pruning configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    /// Master switch for tool pruning
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Drop prefixed duplicates of already-kept tools
    #[serde(default = "default_true")]
    pub dedup: bool,
    /// Prefix stripped from tool names before duplicate detection
    #[serde(default = "default_dedup_prefix")]
    pub dedup_prefix: String,
    /// Keep only the tools listed in `essential_tools`
    #[serde(default)]
    pub essential_only: bool,
    /// Allow-list used when `essential_only` is set
    #[serde(default = "default_essential_tools")]
    pub essential_tools: Vec<String>,
    /// Cut long tool descriptions
    #[serde(default = "default_true")]
    pub truncate_descriptions: bool,
    /// Maximum description length in characters
    #[serde(default = "default_max_description_length")]
    pub max_description_length: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dedup: true,
            dedup_prefix: default_dedup_prefix(),
            essential_only: false,
            essential_tools: default_essential_tools(),
            truncate_descriptions: true,
            max_description_length: default_max_description_length(),
        }
    }
}

fn default_dedup_prefix() -> String {
    "index_".to_string()
}

fn default_essential_tools() -> Vec<String> {
    ["bash", "read", "write", "edit", "glob", "grep", "list"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_max_description_length() -> usize {
    200
}

/// Context window negotiation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ContextConfig {
    /// Inject `default_size` when the request carries no context size
    #[serde(default = "default_true")]
    pub auto_inject: bool,
    /// Context size injected into `options`
    #[serde(default = "default_context_size")]
    pub default_size: u64,
    /// Key inside `options` that holds the context size
    #[serde(default = "default_option_key")]
    pub option_key: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            auto_inject: true,
            default_size: default_context_size(),
            option_key: default_option_key(),
        }
    }
}

fn default_context_size() -> u64 {
    8192
}

fn default_option_key() -> String {
    "num_ctx".to_string()
}

/// Audit sink configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Persist before/after payloads of filtered requests
    #[serde(default)]
    pub enabled: bool,
    /// Directory the audit records are written to
    #[serde(default = "default_audit_dir")]
    pub dir: PathBuf,
    /// Pending records kept before new ones are dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: default_audit_dir(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_audit_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".ctxfilter").join("audit"))
        .unwrap_or_else(|| PathBuf::from(".ctxfilter/audit"))
}

fn default_queue_capacity() -> usize {
    64
}

fn default_true() -> bool {
    true
}
