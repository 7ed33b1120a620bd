// deepchat - Multi-turn streaming chat client with response caching
// Author: kelexine (https://github.com/kelexine)

pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod history;
pub mod models;
pub mod utils;
