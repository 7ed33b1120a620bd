// Reply output channel
// Author: kelexine (https://github.com/kelexine)

use std::io::{self, Write};

/// Receives reply text as it becomes available.
///
/// Cached replies are delivered through the same `emit` call as streamed
/// fragments, so callers render both paths identically.
pub trait ReplySink {
    /// A fragment of reply text.
    fn emit(&mut self, fragment: &str);

    /// Called before a cached reply is emitted.
    fn cache_hit(&mut self) {}

    /// Called once the reply is complete.
    fn finish(&mut self) {}
}

/// Prints fragments to stdout as they arrive.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl ReplySink for StdoutSink {
    fn emit(&mut self, fragment: &str) {
        let mut stdout = io::stdout().lock();
        // A closed stdout must not abort the turn.
        let _ = stdout.write_all(fragment.as_bytes());
        let _ = stdout.flush();
    }

    fn cache_hit(&mut self) {
        println!("(cached)");
    }

    fn finish(&mut self) {
        println!();
    }
}

/// Collects the reply in memory.
impl ReplySink for String {
    fn emit(&mut self, fragment: &str) {
        self.push_str(fragment);
    }
}

/// Discards all output.
#[derive(Debug, Default)]
pub struct NullSink;

impl ReplySink for NullSink {
    fn emit(&mut self, _fragment: &str) {}
}
