//! Interactive conversation loop.
//!
//! One turn is: snapshot history, send the prompt, record both sides of the
//! exchange, run any tagged code blocks, report the cost. The loop exists in a
//! blocking flavour and an async flavour; both end on `exit`/`quit`, end of
//! input or an interrupt.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use super::prompt_line;
use crate::client::{ChatClient, ChatReply, StdoutSink};
use crate::error::{ChatError, Result};
use crate::executor::{BlockOutcome, BlockPrompt, CodeBlock, CodeBlockRunner};
use crate::history::ConversationHistory;
use crate::models::Role;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::future::Future;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Runtime;
use tracing::{info, warn};

/// How often async waits re-check the interrupt flag.
const INTERRUPT_POLL: Duration = Duration::from_millis(100);

const HELP: &str = "\
Commands:
  /new          Clear the conversation history
  /help         Show this help
  exit, quit    Leave

Code blocks in replies:
  ```python-run   runs automatically
  ```python-ask   asks before running
";

/// A parsed line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Exit,
    Clear,
    Help,
    Empty,
    Prompt(String),
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    match line {
        "" => Input::Empty,
        "/new" => Input::Clear,
        "/help" => Input::Help,
        _ if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") => {
            Input::Exit
        }
        _ => Input::Prompt(line.to_string()),
    }
}

/// Asks on the terminal before running `python-ask` blocks and prints outcomes.
#[derive(Debug)]
pub struct TerminalPrompt {
    interrupt: Arc<AtomicBool>,
}

impl TerminalPrompt {
    pub fn new(interrupt: Arc<AtomicBool>) -> Self {
        Self { interrupt }
    }
}

impl BlockPrompt for TerminalPrompt {
    fn confirm(&mut self, _block: &CodeBlock) -> bool {
        match prompt_line("\nRun this code? (y/n) ") {
            Ok(answer) => answer.eq_ignore_ascii_case("y"),
            Err(e) => {
                warn!("Failed to read confirmation: {}", e);
                false
            }
        }
    }

    fn report(&mut self, outcome: &BlockOutcome) {
        match outcome {
            BlockOutcome::Ran(result) if result.timed_out => {
                println!("\nExecution timed out");
            }
            BlockOutcome::Ran(result) => {
                println!("\nExecution result:\n{}", result.output);
            }
            BlockOutcome::Skipped => println!("Skipped execution"),
            BlockOutcome::Failed(reason) => println!("\nExecution failed: {}", reason),
        }
    }

    fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }
}

/// Resolves once `flag` is set.
async fn wait_for_interrupt(flag: &AtomicBool) {
    let mut tick = tokio::time::interval(INTERRUPT_POLL);
    loop {
        tick.tick().await;
        if flag.load(Ordering::SeqCst) {
            return;
        }
    }
}

/// Everything one conversation needs, explicitly owned.
///
/// `interrupt` is set by the Ctrl-C handler; once set, the current turn is
/// abandoned wherever it is and the loop ends.
pub struct Session {
    history: ConversationHistory,
    client: ChatClient,
    runner: CodeBlockRunner,
    use_cache: bool,
    interrupt: Arc<AtomicBool>,
}

impl Session {
    pub fn new(
        history: ConversationHistory,
        client: ChatClient,
        runner: CodeBlockRunner,
        use_cache: bool,
        interrupt: Arc<AtomicBool>,
    ) -> Self {
        Self {
            history,
            client,
            runner,
            use_cache,
            interrupt,
        }
    }

    /// Drive `work` unless an interrupt arrives first, in which case it is dropped.
    async fn until_interrupted<T>(&self, work: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = wait_for_interrupt(&self.interrupt) => Err(ChatError::Interrupted),
            out = work => out,
        }
    }

    /// Run the reply's code blocks. Returns `false` when the loop should end.
    async fn run_blocks(&self, reply: &str) -> bool {
        let mut prompt = TerminalPrompt::new(self.interrupt.clone());
        match self
            .until_interrupted(self.runner.process_blocks(reply, &mut prompt))
            .await
        {
            Ok(_) => true,
            Err(e) if e.is_interrupt() => {
                println!();
                info!("Code execution interrupted");
                false
            }
            Err(e) => {
                warn!("Code execution failed: {}", e);
                true
            }
        }
    }

    fn banner(&self) {
        println!(
            "\nMulti-turn streaming chat with code execution (model: {})",
            self.client.model()
        );
        println!("Wrap code in ```python-run or ```python-ask fences");
        println!("Type /new to clear history, /help for help, exit to quit");
    }

    /// Handle a non-prompt command. Returns `false` when the loop should end.
    fn handle_command(&self, input: &Input) -> bool {
        match input {
            Input::Exit => return false,
            Input::Clear => match self.history.clear() {
                Ok(()) => println!("History cleared"),
                Err(e) => warn!("{}", e),
            },
            Input::Help => print!("\n{}", HELP),
            Input::Empty | Input::Prompt(_) => {}
        }
        true
    }

    /// Record a finished exchange and print its cost.
    fn complete_turn(&self, prompt: &str, reply: &ChatReply) {
        if reply.reply.is_empty() {
            warn!("Empty reply; turn not recorded in history");
        } else {
            self.history.append(Role::User, prompt);
            self.history.append(Role::Assistant, reply.reply.as_str());
        }

        match reply.usage.as_ref() {
            Some(usage) => {
                let cost = self.client.calculate_cost(Some(usage));
                println!(
                    "\nThis turn: {} input tokens, {} output tokens, about ${:.6}",
                    cost.prompt_tokens, cost.completion_tokens, cost.cost
                );
            }
            None => println!("\nToken usage unavailable"),
        }
    }

    /// Blocking conversation loop. Code blocks run on `runtime`.
    pub fn run_blocking(&self, runtime: &Runtime) -> Result<()> {
        let mut editor =
            DefaultEditor::new().map_err(|e| ChatError::Internal(e.to_string()))?;
        self.banner();

        loop {
            self.interrupt.store(false, Ordering::SeqCst);

            let line = match editor.readline("\nYou: ") {
                Ok(line) => line,
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(e) => return Err(ChatError::Internal(e.to_string())),
            };

            let prompt = match parse_input(&line) {
                Input::Prompt(prompt) => prompt,
                other => {
                    if !self.handle_command(&other) {
                        break;
                    }
                    continue;
                }
            };

            print!("Assistant: ");
            io::stdout().flush()?;

            let history = self.history.snapshot();
            let reply = match self
                .client
                .send_blocking(&history, &prompt, self.use_cache, &mut StdoutSink)
            {
                Ok(reply) => reply,
                Err(e) if e.is_interrupt() => {
                    println!();
                    info!("Turn interrupted");
                    break;
                }
                Err(e) => {
                    warn!("Turn failed: {}", e);
                    continue;
                }
            };

            self.complete_turn(&prompt, &reply);
            if !runtime.block_on(self.run_blocks(&reply.reply)) {
                break;
            }
        }

        Ok(())
    }

    /// Async conversation loop; input, streaming and code execution all race Ctrl-C.
    pub async fn run_async(&self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        self.banner();

        loop {
            self.interrupt.store(false, Ordering::SeqCst);
            print!("\nYou: ");
            io::stdout().flush()?;

            let line = match self
                .until_interrupted(async { lines.next_line().await.map_err(ChatError::from) })
                .await
            {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) if e.is_interrupt() => break,
                Err(e) => return Err(e),
            };

            let prompt = match parse_input(&line) {
                Input::Prompt(prompt) => prompt,
                other => {
                    if !self.handle_command(&other) {
                        break;
                    }
                    continue;
                }
            };

            print!("Assistant: ");
            io::stdout().flush()?;

            let history = self.history.snapshot();
            let mut sink = StdoutSink;
            let result = self
                .until_interrupted(self.client.send(&history, &prompt, self.use_cache, &mut sink))
                .await;

            let reply = match result {
                Ok(reply) => reply,
                Err(e) if e.is_interrupt() => {
                    println!();
                    info!("Turn interrupted");
                    break;
                }
                Err(e) => {
                    warn!("Turn failed: {}", e);
                    continue;
                }
            };

            self.complete_turn(&prompt, &reply);
            if !self.run_blocks(&reply.reply).await {
                break;
            }
        }

        Ok(())
    }

    /// Release the client's connection pools.
    pub fn close(self) {
        self.client.close();
    }
}
