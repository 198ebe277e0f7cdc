//! # Stockwell Common Library
//!
//! Shared code for the Stockwell services including:
//! - Error types
//! - Event types (ImportEvent enum) and EventBus
//! - Configuration loading and root folder resolution

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
