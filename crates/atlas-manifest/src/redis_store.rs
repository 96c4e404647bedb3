//! `ManifestStore` backed by the `redis` crate — the concrete KV engine
//! this runtime ships against, reachable via `INTERNAL_REDIS_SERVICE_NAME`
//! / `INTERNAL_REDIS_PORT` (`spec.md` §6). JSON-document operations are
//! issued as raw `JSON.*` commands (the RedisJSON module), since the
//! `redis` crate has no typed wrapper for them.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{cmd, Client};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{Result, StoreError};
use crate::store::ManifestStore;

/// Connect-time retry/backoff policy (`spec.md` §6: "retry/backoff on
/// connect, max retries and interval configurable").
#[derive(Clone, Copy, Debug)]
pub struct ConnectRetryPolicy {
    pub max_retries: u32,
    pub interval: Duration,
}

impl Default for ConnectRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            interval: Duration::from_millis(500),
        }
    }
}

pub struct RedisManifestStore {
    conn: ConnectionManager,
}

impl RedisManifestStore {
    /// Connects to `host:port`, retrying per `policy` on failure. Mirrors
    /// the teacher's `ConnectionManager`-wrapped clients: one logical
    /// handle, internally reconnecting, cheap to clone.
    pub async fn connect(host: &str, port: u16, policy: ConnectRetryPolicy) -> Result<Self> {
        let url = format!("redis://{host}:{port}");
        let client = Client::open(url.as_str())?;

        let mut attempt = 0;
        loop {
            match client.get_connection_manager().await {
                Ok(conn) => {
                    info!(host, port, "connected to manifest store");
                    return Ok(Self { conn });
                }
                Err(e) => {
                    attempt += 1;
                    if attempt > policy.max_retries {
                        return Err(StoreError::RetriesExhausted {
                            attempts: attempt,
                            last: e.to_string(),
                        });
                    }
                    warn!(host, port, attempt, error = %e, "manifest store connect failed, retrying");
                    tokio::time::sleep(policy.interval).await;
                }
            }
        }
    }

    /// Connects using the environment variables named in `spec.md` §6,
    /// defaulting the port to 6379 if `INTERNAL_REDIS_PORT` is unset.
    pub async fn connect_from_env(policy: ConnectRetryPolicy) -> Result<Self> {
        let host = std::env::var("INTERNAL_REDIS_SERVICE_NAME").unwrap_or_else(|_| "localhost".to_string());
        let port = std::env::var("INTERNAL_REDIS_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(6379);
        Self::connect(&host, port, policy).await
    }
}

#[async_trait]
impl ManifestStore for RedisManifestStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        Ok(cmd("GET").arg(key).query_async(&mut conn).await?)
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = cmd("SET").arg(key).arg(value).query_async(&mut conn).await?;
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let n: i64 = cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(n > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let n: i64 = cmd("EXISTS").arg(key).query_async(&mut conn).await?;
        Ok(n > 0)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let n: i64 = cmd("EXPIRE").arg(key).arg(ttl.as_secs().max(1)).query_async(&mut conn).await?;
        Ok(n > 0)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.conn.clone();
        let secs: i64 = cmd("TTL").arg(key).query_async(&mut conn).await?;
        Ok(if secs >= 0 { Some(Duration::from_secs(secs as u64)) } else { None })
    }

    async fn hset(&self, key: &str, field: &str, value: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = cmd("HSET").arg(key).arg(field).arg(value).query_async(&mut conn).await?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        Ok(cmd("HGET").arg(key).arg(field).query_async(&mut conn).await?)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, Vec<u8>>> {
        let mut conn = self.conn.clone();
        let pairs: Vec<(String, Vec<u8>)> = cmd("HGETALL").arg(key).query_async(&mut conn).await?;
        Ok(pairs.into_iter().collect())
    }

    async fn hexists(&self, key: &str, field: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let n: i64 = cmd("HEXISTS").arg(key).arg(field).query_async(&mut conn).await?;
        Ok(n > 0)
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let n: i64 = cmd("HDEL").arg(key).arg(field).query_async(&mut conn).await?;
        Ok(n > 0)
    }

    async fn hlen(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        Ok(cmd("HLEN").arg(key).query_async(&mut conn).await?)
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let mut conn = self.conn.clone();
        Ok(cmd("HINCRBY").arg(key).arg(field).arg(delta).query_async(&mut conn).await?)
    }

    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let mut c = cmd("HMGET");
        c.arg(key);
        for f in fields {
            c.arg(f);
        }
        Ok(c.query_async(&mut conn).await?)
    }

    async fn sadd(&self, key: &str, member: &[u8]) -> Result<bool> {
        let mut conn = self.conn.clone();
        let n: i64 = cmd("SADD").arg(key).arg(member).query_async(&mut conn).await?;
        Ok(n > 0)
    }

    async fn srem(&self, key: &str, member: &[u8]) -> Result<bool> {
        let mut conn = self.conn.clone();
        let n: i64 = cmd("SREM").arg(key).arg(member).query_async(&mut conn).await?;
        Ok(n > 0)
    }

    async fn sismember(&self, key: &str, member: &[u8]) -> Result<bool> {
        let mut conn = self.conn.clone();
        let n: i64 = cmd("SISMEMBER").arg(key).arg(member).query_async(&mut conn).await?;
        Ok(n > 0)
    }

    async fn scard(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        Ok(cmd("SCARD").arg(key).query_async(&mut conn).await?)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<Vec<u8>>> {
        let mut conn = self.conn.clone();
        Ok(cmd("SMEMBERS").arg(key).query_async(&mut conn).await?)
    }

    /// Redis's `SPOP` is a genuine atomic pop, so this overrides the
    /// default CAS-loop fallback (`spec.md` §4.2's primary path, not its
    /// fallback clause).
    async fn spop(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        Ok(cmd("SPOP").arg(key).query_async(&mut conn).await?)
    }

    async fn zadd(&self, key: &str, member: &[u8], score: f64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = cmd("ZADD").arg(key).arg(score).arg(member).query_async(&mut conn).await?;
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &[u8]) -> Result<bool> {
        let mut conn = self.conn.clone();
        let n: i64 = cmd("ZREM").arg(key).arg(member).query_async(&mut conn).await?;
        Ok(n > 0)
    }

    async fn zscore(&self, key: &str, member: &[u8]) -> Result<Option<f64>> {
        let mut conn = self.conn.clone();
        Ok(cmd("ZSCORE").arg(key).arg(member).query_async(&mut conn).await?)
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<Vec<u8>>> {
        let mut conn = self.conn.clone();
        Ok(cmd("ZRANGE").arg(key).arg(start).arg(stop).query_async(&mut conn).await?)
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        Ok(cmd("ZCARD").arg(key).query_async(&mut conn).await?)
    }

    async fn json_set(&self, key: &str, path: &str, value: &Value, nx: bool) -> Result<bool> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(value).map_err(|e| StoreError::Json {
            key: key.to_string(),
            path: path.to_string(),
            source: e,
        })?;
        let mut c = cmd("JSON.SET");
        c.arg(key).arg(path).arg(payload);
        if nx {
            c.arg("NX");
        }
        let reply: Option<String> = c.query_async(&mut conn).await?;
        Ok(reply.is_some())
    }

    async fn json_get(&self, key: &str, path: &str) -> Result<Option<Value>> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = cmd("JSON.GET").arg(key).arg(path).query_async(&mut conn).await?;
        match reply {
            Some(s) => Ok(Some(serde_json::from_str(&s).map_err(|e| StoreError::Json {
                key: key.to_string(),
                path: path.to_string(),
                source: e,
            })?)),
            None => Ok(None),
        }
    }

    async fn json_del(&self, key: &str, path: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let n: i64 = cmd("JSON.DEL").arg(key).arg(path).query_async(&mut conn).await?;
        Ok(n > 0)
    }
}
