//! Wires C1-C10 into one explicit-context shard runtime, generic over the
//! spatial bound shape in use.

pub mod config;
pub mod error;
pub mod runtime;

pub use config::ShardRuntimeConfig;
pub use error::{Result, RuntimeError};
pub use runtime::ShardRuntime;
