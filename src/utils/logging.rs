//! Structured logging and security-focused trace utilities.
//!
//! This module configures the `tracing` ecosystem for the application,
//! supporting multiple output formats and providing utilities to prevent
//! API keys from leaking into logs.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use crate::config::LoggingConfig;
use crate::error::Result;
use regex::Regex;
use std::sync::OnceLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the global tracing subscriber for the application.
///
/// Supports three output formats:
/// - `json`: Structured JSON logs.
/// - `compact`: Single-line human-readable output.
/// - `pretty` (default): Multi-line, colorized output.
///
/// Logs go to stderr; stdout carries the streamed reply. Log levels are
/// controlled via the `RUST_LOG` environment variable or the provided
/// `LoggingConfig`.
pub fn init(config: &LoggingConfig) -> Result<()> {
    // Configure filter from environment or config file
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        "compact" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .compact()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
    }

    Ok(())
}

/// Sanitizes API keys from log messages.
///
/// Upstream error bodies sometimes echo the rejected key back
/// (`Incorrect API key provided: sk-...`). Every `sk-` token that starts a
/// word and every `Bearer` credential is replaced with a `\[REDACTED\]`
/// placeholder.
///
/// # Arguments
///
/// * `input` - The raw string that may contain sensitive data.
///
/// # Returns
///
/// A new string where all detected secrets have been replaced.
pub fn sanitize(input: &str) -> String {
    static API_KEY: OnceLock<Regex> = OnceLock::new();
    static BEARER: OnceLock<Regex> = OnceLock::new();

    // Pattern 1: secret keys, "sk-" followed by the key body
    let api_key = API_KEY
        .get_or_init(|| Regex::new(r"\bsk-[A-Za-z0-9_-]+").expect("valid api key regex"));
    let result = api_key.replace_all(input, "[REDACTED_API_KEY]");

    // Pattern 2: Authorization header values
    let bearer = BEARER
        .get_or_init(|| Regex::new(r#"\bBearer [^\s"',]+"#).expect("valid bearer regex"));
    bearer.replace_all(&result, "Bearer [REDACTED]").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_api_key() {
        let input = r#"{"error":{"message":"Incorrect API key provided: sk-abc123def"}}"#;
        let output = sanitize(input);
        assert!(output.contains("[REDACTED_API_KEY]"));
        assert!(!output.contains("sk-abc123def"));
        assert!(output.ends_with(r#""}}"#));
    }

    #[test]
    fn test_sanitize_bearer_header() {
        let input = "Authorization: Bearer token-value next";
        let output = sanitize(input);
        assert_eq!(output, "Authorization: Bearer [REDACTED] next");
    }

    #[test]
    fn test_sanitize_multiple_keys() {
        let output = sanitize("sk-one and sk-two");
        assert_eq!(output, "[REDACTED_API_KEY] and [REDACTED_API_KEY]");
    }

    #[test]
    fn test_sanitize_ignores_sk_inside_words() {
        let input = "task-42 failed for disk-3";
        assert_eq!(sanitize(input), input);
    }

    #[test]
    fn test_sanitize_leaves_clean_text() {
        let input = "model not found";
        assert_eq!(sanitize(input), input);
    }
}
