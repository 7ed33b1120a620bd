//! Bounded, persisted conversation history.
//!
//! The in-memory window holds at most `max_history` messages and evicts the
//! oldest first. Every append is also written as one JSON line to an
//! append-only log, which is replayed on start-up to rebuild the window.
//! Disk failures are logged; the in-memory window always advances.

// Author: kelexine (https://github.com/kelexine)

use crate::config::HistoryConfig;
use crate::error::{ChatError, Result};
use crate::models::{Message, Role};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Sliding window of chat turns backed by a JSON-lines log.
pub struct ConversationHistory {
    path: PathBuf,
    max_history: usize,
    window: RwLock<VecDeque<Message>>,
}

impl ConversationHistory {
    /// Open the history at `config.path`, replaying any existing log.
    pub fn new(config: &HistoryConfig) -> Self {
        Self::open(&config.path, config.max_history)
    }

    pub fn open(path: impl Into<PathBuf>, max_history: usize) -> Self {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!("Failed to create history directory {}: {}", parent.display(), e);
            }
        }

        let history = Self {
            path,
            max_history,
            window: RwLock::new(VecDeque::with_capacity(max_history.min(1024))),
        };

        let replayed = history.load();
        {
            let mut window = history.window.write();
            for message in replayed {
                Self::push_bounded(&mut window, max_history, message);
            }
            debug!(
                "Loaded {} messages from {}",
                window.len(),
                history.path.display()
            );
        }

        history
    }

    /// Replay the persisted log in file order.
    ///
    /// Blank lines are ignored and unparseable lines are skipped with a warning.
    pub fn load(&self) -> Vec<Message> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to open history file {}: {}", self.path.display(), e);
                }
                return Vec::new();
            }
        };

        let mut messages = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("Stopped reading history at line {}: {}", index + 1, e);
                    break;
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<Message>(&line) {
                Ok(message) => messages.push(message),
                Err(e) => warn!("Skipping malformed history line {}: {}", index + 1, e),
            }
        }

        messages
    }

    /// Add a message to the window and append it to the log.
    ///
    /// Returns whether the record reached disk. The in-memory append is never
    /// rolled back.
    pub fn append(&self, role: Role, content: impl Into<String>) -> bool {
        let message = Message::new(role, content);

        let mut window = self.window.write();
        let persisted = match self.append_record(&message) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to save history message: {}", e);
                false
            }
        };
        Self::push_bounded(&mut window, self.max_history, message);

        persisted
    }

    fn append_record(&self, message: &Message) -> Result<()> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    fn push_bounded(window: &mut VecDeque<Message>, max_history: usize, message: Message) {
        window.push_back(message);
        while window.len() > max_history {
            window.pop_front();
        }
    }

    /// Copy of the current window, oldest first.
    pub fn snapshot(&self) -> Vec<Message> {
        self.window.read().iter().cloned().collect()
    }

    /// Empty the window and truncate the log.
    ///
    /// The write lock is held across both steps, so no snapshot observes a
    /// half-cleared history.
    pub fn clear(&self) -> Result<()> {
        let mut window = self.window.write();
        window.clear();

        File::create(&self.path).map_err(|e| {
            ChatError::History(format!(
                "failed to truncate {}: {}",
                self.path.display(),
                e
            ))
        })?;

        info!("Conversation history cleared");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.window.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.read().is_empty()
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
