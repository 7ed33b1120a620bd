// Response cache module
// Author: kelexine (https://github.com/kelexine)

pub mod manager;
pub mod models;

pub use manager::{compute_key, CacheStore};
pub use models::{CacheEntry, CacheStats};
