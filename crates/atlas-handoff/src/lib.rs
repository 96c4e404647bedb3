//! Connection lifecycle for inter-shard links (C9, `spec.md` §4.6):
//! liveness probing, inactivity reaping, and the advisory connection
//! lease that keeps two shards from dialing each other simultaneously.

pub mod error;
pub mod manager;

pub use error::{HandoffError, Result};
pub use manager::{HandoffConfig, HandoffConnectionManager};
