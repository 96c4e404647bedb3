//! The `ManifestStore` contract (`spec.md` §6, C1): the key-value
//! operations the runtime assumes of its external state service, plus the
//! JSON-document mutation the transfer manifest needs.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// A key-value service with hash, set, sorted-set, string, TTL, and
/// JSON-document semantics. One logical endpoint, cluster-or-standalone;
/// the trait does not distinguish.
#[async_trait]
pub trait ManifestStore: Send + Sync {
    // ---- string / generic --------------------------------------------
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;
    /// `SET key value NX EX ttl`. Returns `true` if the key was absent and
    /// is now set; `false` if it already existed (value unchanged).
    async fn set_nx_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool>;
    async fn del(&self, key: &str) -> Result<bool>;
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    // ---- hash -----------------------------------------------------------
    async fn hset(&self, key: &str, field: &str, value: &[u8]) -> Result<()>;
    async fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, Vec<u8>>>;
    async fn hexists(&self, key: &str, field: &str) -> Result<bool>;
    async fn hdel(&self, key: &str, field: &str) -> Result<bool>;
    async fn hlen(&self, key: &str) -> Result<u64>;
    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64>;
    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<Vec<u8>>>>;

    // ---- set --------------------------------------------------------------
    async fn sadd(&self, key: &str, member: &[u8]) -> Result<bool>;
    async fn srem(&self, key: &str, member: &[u8]) -> Result<bool>;
    async fn sismember(&self, key: &str, member: &[u8]) -> Result<bool>;
    async fn scard(&self, key: &str) -> Result<u64>;
    async fn smembers(&self, key: &str) -> Result<Vec<Vec<u8>>>;

    /// Atomically remove and return one member, or `None` if the set is
    /// empty. The default implementation is a compare-and-set loop over a
    /// snapshot (`spec.md` §4.2's fallback clause): it races `srem` against
    /// every candidate in the snapshot and returns the first one this
    /// caller actually removed. Backends with a true atomic pop (redis
    /// `SPOP`) override this directly.
    async fn spop(&self, key: &str) -> Result<Option<Vec<u8>>> {
        loop {
            let candidates = self.smembers(key).await?;
            if candidates.is_empty() {
                return Ok(None);
            }
            for candidate in candidates {
                if self.srem(key, &candidate).await? {
                    return Ok(Some(candidate));
                }
            }
        }
    }

    // ---- sorted set ---------------------------------------------------
    async fn zadd(&self, key: &str, member: &[u8], score: f64) -> Result<()>;
    async fn zrem(&self, key: &str, member: &[u8]) -> Result<bool>;
    async fn zscore(&self, key: &str, member: &[u8]) -> Result<Option<f64>>;
    async fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<Vec<u8>>>;
    async fn zcard(&self, key: &str) -> Result<u64>;

    // ---- JSON document --------------------------------------------------
    /// `JSON.SET key path value [NX]`. `path` uses a leading-dot field
    /// path (`.EntityTransfers.<uuid>`); the root document is `.`. Creates
    /// intermediate objects as needed. When `nx` is set, a no-op (returns
    /// `false`) if the path already holds a value.
    async fn json_set(&self, key: &str, path: &str, value: &Value, nx: bool) -> Result<bool>;
    async fn json_get(&self, key: &str, path: &str) -> Result<Option<Value>>;
    async fn json_del(&self, key: &str, path: &str) -> Result<bool>;
}
