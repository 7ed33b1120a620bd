// CLI module for deepchat
// Author: kelexine (https://github.com/kelexine)

mod session;

pub use session::{parse_input, Input, Session, TerminalPrompt};

use crate::config::AppConfig;
use crate::error::{ChatError, Result};
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::{info, warn};

/// deepchat - Multi-turn streaming chat with inline code execution
#[derive(Parser, Debug, Default)]
#[command(name = "deepchat", version, about, long_about = None)]
pub struct Args {
    /// API key, takes precedence over the config file
    #[arg(long, env = "DEEPSEEK_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Model name (saved to the config file when it changes)
    #[arg(long)]
    pub model: Option<String>,

    /// Config file path (default: ~/.deepchat/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Disable the response cache
    #[arg(long)]
    pub no_cache: bool,

    /// Run the conversation loop on the async runtime
    #[arg(long = "async")]
    pub use_async: bool,
}

/// Apply CLI overrides and make sure an API key is available.
///
/// A key typed at the prompt and a changed `--model` are written back to the
/// config file; a failed write only logs a warning.
pub fn resolve_credentials(config: &mut AppConfig, args: &Args) -> Result<()> {
    let mut changed = false;

    if let Some(key) = &args.api_key {
        config.api.api_key = key.clone();
    }

    if config.api.api_key.trim().is_empty() {
        let key = prompt_line("Enter API key: ")?;
        if key.is_empty() {
            return Err(ChatError::Config("API key must not be empty".to_string()));
        }
        config.api.api_key = key;
        changed = true;
    }

    if let Some(model) = &args.model {
        if *model != config.api.model {
            info!("Switching model to {}", model);
            config.api.model = model.clone();
            changed = true;
        }
    }

    if changed {
        if let Err(e) = config.save(args.config.as_deref()) {
            warn!("Failed to save configuration: {}", e);
        }
    }

    Ok(())
}

/// Print `prompt` and read one trimmed line from stdin.
pub fn prompt_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
