//! Extraction and execution of fenced code blocks in replies.
//!
//! Two fence tags are recognised:
//! - ```` ```python-run ```` blocks are executed unconditionally.
//! - ```` ```python-ask ```` blocks are executed only after confirmation.
//!
//! Code runs from a single reusable script file under a hard deadline. This is
//! a convenience, not a sandbox.

// Author: kelexine (https://github.com/kelexine)

use crate::config::ExecutorConfig;
use crate::error::{ChatError, Result};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// How a block asks to be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockMode {
    Run,
    Ask,
}

/// A fenced block extracted from a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub mode: BlockMode,
    /// Body with surrounding whitespace trimmed.
    pub code: String,
}

/// Result of running one script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// Captured stdout followed by stderr. Empty on timeout.
    pub output: String,
    pub timed_out: bool,
    pub exit_code: Option<i32>,
}

/// What happened to one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    Ran(ExecutionOutcome),
    Skipped,
    Failed(String),
}

/// Interaction hooks used while processing blocks.
pub trait BlockPrompt {
    /// Whether an `ask` block should run.
    fn confirm(&mut self, block: &CodeBlock) -> bool;

    /// Called after each block is handled, in order.
    fn report(&mut self, _outcome: &BlockOutcome) {}

    /// Whether the user asked to abandon the turn.
    ///
    /// Checked after every confirmation and around every block.
    fn interrupted(&self) -> bool {
        false
    }
}

fn opener() -> &'static Regex {
    static OPENER: OnceLock<Regex> = OnceLock::new();
    OPENER.get_or_init(|| Regex::new(r"```python-(run|ask)\s*$").expect("valid fence regex"))
}

/// Scan `text` for tagged fenced blocks, in order.
///
/// An opener ends its line, possibly after other text (`Run: ```python-run`).
/// A block ends at the first ```` ``` ```` on a later line; text before it on
/// that line belongs to the block. A block still open when another opener or
/// the end of text is reached is dropped.
pub fn extract_blocks(text: &str) -> Vec<CodeBlock> {
    let mut blocks = Vec::new();
    let mut current: Option<(BlockMode, String)> = None;

    for line in text.lines() {
        if let Some(caps) = opener().captures(line) {
            if current.is_some() {
                debug!("Discarding unterminated code block");
            }
            let mode = if &caps[1] == "run" {
                BlockMode::Run
            } else {
                BlockMode::Ask
            };
            current = Some((mode, String::new()));
            continue;
        }

        let Some((mode, mut body)) = current.take() else {
            continue;
        };

        if let Some(pos) = line.find("```") {
            body.push_str(&line[..pos]);
            blocks.push(CodeBlock {
                mode,
                code: body.trim().to_string(),
            });
        } else {
            body.push_str(line);
            body.push('\n');
            current = Some((mode, body));
        }
    }

    if current.is_some() {
        debug!("Discarding unterminated code block at end of text");
    }

    blocks
}

/// Temporary script that is removed when dropped.
struct TempScript {
    path: PathBuf,
}

impl TempScript {
    fn write(path: PathBuf, code: &str) -> Result<Self> {
        fs::write(&path, code).map_err(|e| {
            ChatError::Execution(format!("failed to write {}: {}", path.display(), e))
        })?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempScript {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Runs extracted blocks through the configured interpreter.
pub struct CodeBlockRunner {
    config: ExecutorConfig,
}

impl CodeBlockRunner {
    pub fn new(config: &ExecutorConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn script_path(&self) -> PathBuf {
        self.config.work_dir.join(&self.config.script_name)
    }

    /// Run `code` and capture its combined output.
    ///
    /// The child is killed once the deadline passes; the outcome then has
    /// empty output and `timed_out` set. The script file is removed on every
    /// path out of this function.
    pub async fn execute(&self, code: &str) -> Result<ExecutionOutcome> {
        fs::create_dir_all(&self.config.work_dir)?;
        let script = TempScript::write(self.script_path(), code)?;

        let mut command = Command::new(&self.config.interpreter);
        command
            .arg(script.path())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let deadline = Duration::from_secs(self.config.timeout_seconds);
        debug!(
            "Running {} with {} (deadline {}s)",
            script.path().display(),
            self.config.interpreter,
            self.config.timeout_seconds
        );

        match tokio::time::timeout(deadline, command.output()).await {
            Ok(Ok(output)) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                Ok(ExecutionOutcome {
                    output: combined,
                    timed_out: false,
                    exit_code: output.status.code(),
                })
            }
            Ok(Err(e)) => Err(ChatError::Execution(format!(
                "failed to start {}: {}",
                self.config.interpreter, e
            ))),
            Err(_) => {
                warn!(
                    "Code execution timed out after {}s",
                    self.config.timeout_seconds
                );
                Ok(ExecutionOutcome {
                    output: String::new(),
                    timed_out: true,
                    exit_code: None,
                })
            }
        }
    }

    /// Handle a single block according to its mode.
    ///
    /// Returns `ChatError::Interrupted` when the user interrupts at the
    /// confirmation; the block is then not run.
    pub async fn process_block(
        &self,
        block: &CodeBlock,
        prompt: &mut dyn BlockPrompt,
    ) -> Result<BlockOutcome> {
        if block.mode == BlockMode::Ask {
            let accepted = prompt.confirm(block);
            if prompt.interrupted() {
                return Err(ChatError::Interrupted);
            }
            if !accepted {
                return Ok(BlockOutcome::Skipped);
            }
        }

        match self.execute(&block.code).await {
            Ok(outcome) => Ok(BlockOutcome::Ran(outcome)),
            Err(e) => {
                warn!("Code block failed: {}", e);
                Ok(BlockOutcome::Failed(e.to_string()))
            }
        }
    }

    /// Extract and handle every block in `text`, in order.
    ///
    /// An interrupt abandons the remaining blocks and is returned as
    /// `ChatError::Interrupted`.
    pub async fn process_blocks(
        &self,
        text: &str,
        prompt: &mut dyn BlockPrompt,
    ) -> Result<Vec<BlockOutcome>> {
        let mut outcomes = Vec::new();
        for block in extract_blocks(text) {
            if prompt.interrupted() {
                return Err(ChatError::Interrupted);
            }
            let outcome = self.process_block(&block, prompt).await?;
            prompt.report(&outcome);
            outcomes.push(outcome);
        }

        if prompt.interrupted() {
            return Err(ChatError::Interrupted);
        }
        Ok(outcomes)
    }
}
