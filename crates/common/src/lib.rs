//! Shared error definitions and utilities used across all mcphost crates.

pub mod error;

pub use error::{Error, Result};

/// Milliseconds since the Unix epoch. Used for event timestamps and
/// persisted created/updated fields.
#[must_use]
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
