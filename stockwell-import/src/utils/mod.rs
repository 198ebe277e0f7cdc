//! Utility functions for stockwell-import

pub mod retry;

pub use retry::retry_transient;
