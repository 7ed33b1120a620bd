// Cache store - handles cache key generation, lookup and persistence
// Author: kelexine (https://github.com/kelexine)

use crate::cache::models::{CacheEntry, CacheStats};
use crate::models::{Message, Usage};
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Generate the SHA256 cache key for a `(history, prompt, model)` triple.
///
/// The triple is serialized as `{"messages", "prompt", "model"}` with object
/// keys sorted at every depth, so the key only depends on the values.
pub fn compute_key(messages: &[Message], prompt: &str, model: &str) -> String {
    let input = canonicalize(json!({
        "messages": messages,
        "prompt": prompt,
        "model": model,
    }));

    let mut hasher = Sha256::new();
    hasher.update(input.to_string().as_bytes());

    format!("{:x}", hasher.finalize())
}

/// Rebuild every object with its keys in sorted order.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let sorted: Map<String, Value> = entries
                .into_iter()
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Content-addressed reply cache, one JSON file per key.
///
/// Entries are never evicted. Read and write failures are logged and
/// absorbed: a bad entry is a miss, a failed write leaves the caller's
/// in-memory reply untouched.
pub struct CacheStore {
    dir: PathBuf,
    stats: RwLock<CacheStats>,
}

impl CacheStore {
    /// Create a cache rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if let Err(e) = fs::create_dir_all(&dir) {
            warn!("Failed to create cache directory {}: {}", dir.display(), e);
        }

        Self {
            dir,
            stats: RwLock::new(CacheStats::default()),
        }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    /// Look up a stored reply. Missing, unreadable and corrupt entries are all misses.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let path = self.entry_path(key);

        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to read cache entry {}: {}", path.display(), e);
                }
                debug!("Cache miss for key: {}", short(key));
                self.stats.write().misses += 1;
                return None;
            }
        };

        match serde_json::from_str::<CacheEntry>(&contents) {
            Ok(entry) => {
                debug!("Cache hit for key: {}", short(key));
                self.stats.write().hits += 1;
                Some(entry)
            }
            Err(e) => {
                warn!("Ignoring corrupt cache entry {}: {}", path.display(), e);
                self.stats.write().misses += 1;
                None
            }
        }
    }

    /// Persist a reply under `key`, replacing any previous entry.
    ///
    /// Returns whether the entry reached disk.
    pub fn put(&self, key: &str, response: &str, usage: Option<Usage>) -> bool {
        let entry = CacheEntry {
            response: response.to_string(),
            usage,
            timestamp: Utc::now(),
        };

        match self.write_entry(key, &entry) {
            Ok(()) => {
                debug!("Cached reply for key: {}", short(key));
                self.stats.write().writes += 1;
                true
            }
            Err(e) => {
                warn!("Failed to save cache entry {}: {}", short(key), e);
                self.stats.write().write_failures += 1;
                false
            }
        }
    }

    fn write_entry(&self, key: &str, entry: &CacheEntry) -> crate::error::Result<()> {
        let path = self.entry_path(key);
        let staging = self.dir.join(format!("{}.tmp", key));

        fs::write(&staging, serde_json::to_vec(entry)?)?;
        fs::rename(&staging, &path)?;
        Ok(())
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        self.stats.read().clone()
    }
}

fn short(key: &str) -> &str {
    &key[..key.len().min(16)]
}
