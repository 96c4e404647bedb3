//! `ManifestStore` (C1): the contract the runtime assumes of its external
//! state service, plus two implementations — an in-memory one for tests
//! and a `redis`-backed one for production.

pub mod error;
pub mod json_path;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::MemoryManifestStore;
pub use redis_store::{ConnectRetryPolicy, RedisManifestStore};
pub use store::ManifestStore;
