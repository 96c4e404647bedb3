//! Errors raised by the manifest store adapter.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Manifest-store I/O failure. Backends retry with backoff internally;
/// this bubbles up only once retries are exhausted. Background loops
/// that call the store are expected to log and sleep rather than
/// propagate further (`spec.md` §7).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("json document error at {key}{path}: {source}")]
    Json {
        key: String,
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("connection retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("value at {0} is not a JSON object, cannot descend into path")]
    NotAnObject(String),
}
