// Error types for the deepchat client
// Author: kelexine (https://github.com/kelexine)

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("History error: {0}")]
    History(String),

    #[error("Code execution error: {0}")]
    Execution(String),

    #[error("Turn interrupted by user")]
    Interrupted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Config parsing error: {0}")]
    ConfigParsing(#[from] config::ConfigError),

    #[error("Config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// Whether this error ends the conversation loop rather than just the current turn.
    pub fn is_interrupt(&self) -> bool {
        matches!(self, ChatError::Interrupted)
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
