//! Configuration data structures for the deepchat client.
//!
//! This module defines the schema for the application settings: the upstream
//! chat-completion endpoint, conversation history, the response cache, the
//! code runner, and logging.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The root configuration object for the application.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Upstream chat-completion API settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// Conversation history settings.
    #[serde(default)]
    pub history: HistoryConfig,

    /// On-disk response cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Inline code execution settings.
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Logging and observability settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings for the upstream chat-completion API connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Bearer token sent with every request.
    /// Default: empty (prompted for at start-up)
    #[serde(default)]
    pub api_key: String,

    /// Model identifier sent in the request body.
    /// Default: `deepseek-chat`
    #[serde(default = "default_model")]
    pub model: String,

    /// Full URL of the chat-completion endpoint.
    #[serde(default = "default_url")]
    pub url: String,

    /// Connect timeout in seconds. The response stream itself is never timed out.
    /// Default: `60`
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Price charged per prompt token, in dollars.
    /// Default: `0.00001`
    #[serde(default = "default_input_price")]
    pub input_price_per_token: f64,

    /// Price charged per completion token, in dollars.
    /// Default: `0.00002`
    #[serde(default = "default_output_price")]
    pub output_price_per_token: f64,
}

/// Settings for the persisted conversation window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Maximum number of messages kept as request context.
    /// Default: `100`
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Append-only JSON-lines log backing the window.
    /// Default: `~/.deepchat/history.jsonl`
    #[serde(default = "default_history_path")]
    pub path: PathBuf,
}

/// Settings for the content-addressed response cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether cached replies are looked up and stored.
    /// Default: `true`
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory holding one JSON file per cache key.
    /// Default: `~/.deepchat/cache`
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
}

/// Settings for running `python-run` / `python-ask` blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Program the extracted code is handed to.
    /// Default: `python3`
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// File name of the reusable temporary script.
    /// Default: `_tmp.py`
    #[serde(default = "default_script_name")]
    pub script_name: String,

    /// Directory the temporary script is written to.
    /// Default: `~/.deepchat/tmp`
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Hard wall-clock limit for one execution.
    /// Default: `15`
    #[serde(default = "default_exec_timeout")]
    pub timeout_seconds: u64,
}

/// Settings for application logging and output format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum log level (`trace`, `debug`, `info`, `warn`, `error`).
    /// Default: `warn`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format for logs (`pretty`, `json`, `compact`).
    /// Default: `pretty`
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default trait implementations linking to custom logic

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            url: default_url(),
            timeout_seconds: default_timeout(),
            input_price_per_token: default_input_price(),
            output_price_per_token: default_output_price(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
            path: default_history_path(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_cache_dir(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            script_name: default_script_name(),
            work_dir: default_work_dir(),
            timeout_seconds: default_exec_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Root directory for everything deepchat persists.
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".deepchat")
}

// Helper functions for serde defaults and shared constants
fn default_model() -> String {
    "deepseek-chat".to_string()
}

fn default_url() -> String {
    "https://api.deepseek.com/v1/chat/completions".to_string()
}

fn default_timeout() -> u64 {
    60
}

fn default_input_price() -> f64 {
    0.00001
}

fn default_output_price() -> f64 {
    0.00002
}

fn default_max_history() -> usize {
    100
}

fn default_history_path() -> PathBuf {
    data_dir().join("history.jsonl")
}

fn default_true() -> bool {
    true
}

fn default_cache_dir() -> PathBuf {
    data_dir().join("cache")
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_script_name() -> String {
    "_tmp.py".to_string()
}

fn default_work_dir() -> PathBuf {
    data_dir().join("tmp")
}

fn default_exec_timeout() -> u64 {
    15
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}
