//! # Reel Common Library
//!
//! Shared code for the reel media library crates:
//! - Error type used by configuration and event plumbing
//! - Configuration loading (TOML bootstrap + environment overrides)
//! - Library event types and the broadcast EventBus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
