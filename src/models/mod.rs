//! Data models for the chat-completion API.
//!
//! This module contains the type definitions shared by the history, cache and
//! client layers:
//! - Conversation turns and the outgoing request body (`chat`)
//! - Server-sent event payloads and parsed stream chunks (`streaming`)

// Author: kelexine (https://github.com/kelexine)

pub mod chat;
pub mod streaming;

pub use chat::{ChatRequest, Message, Role, Usage};
pub use streaming::{ChunkPayload, StreamChunk};
