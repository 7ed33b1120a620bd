//! Utility functions and helpers for the deepchat client.
//!
//! This module provides cross-cutting concerns like structured logging and
//! secret sanitization.
//!
//! # Submodules
//!
//! - `logging`: Tracing initialization with security filters.
//!
//! Author: kelexine (<https://github.com/kelexine>)

pub mod logging;
