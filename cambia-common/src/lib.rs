//! # Cambia Common Library
//!
//! Shared code for the Cambia upload client crates:
//! - Error types
//! - Configuration loading (TOML bootstrap, environment, defaults)
//! - Store event types and the EventBus used to observe them
//! - Timestamp helpers

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
