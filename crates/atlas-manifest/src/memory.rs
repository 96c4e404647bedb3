//! In-memory `ManifestStore`, used by unit and scenario tests in the same
//! spirit as the teacher's `sled`-backed `Storage` being swapped for a
//! `tempdir()` — here swapped for nothing on disk at all, since the
//! manifest store's contract is pure key-value plus TTL, not a durable
//! log.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::Result;
use crate::json_path;
use crate::store::ManifestStore;

#[derive(Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn fresh(value: Vec<u8>) -> Self {
        Self { value, expires_at: None }
    }

    fn is_live(&self) -> bool {
        self.expires_at.map(|t| t > Instant::now()).unwrap_or(true)
    }
}

#[derive(Default)]
struct State {
    strings: HashMap<String, Entry>,
    hashes: HashMap<String, HashMap<String, Vec<u8>>>,
    sets: HashMap<String, Vec<Vec<u8>>>,
    zsets: HashMap<String, Vec<(Vec<u8>, f64)>>,
    documents: HashMap<String, Value>,
}

/// Single-process manifest store backed by a mutex-guarded map. Correct
/// for the scenario tests' multi-`ShardRuntime`-in-one-process model; not
/// a substitute for the `redis` backend's cross-process atomicity.
#[derive(Default)]
pub struct MemoryManifestStore {
    state: Mutex<State>,
}

impl MemoryManifestStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ManifestStore for MemoryManifestStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut state = self.state.lock();
        if let Some(entry) = state.strings.get(key) {
            if !entry.is_live() {
                state.strings.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.state.lock().strings.insert(key.to_string(), Entry::fresh(value.to_vec()));
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        let mut state = self.state.lock();
        let occupied = state.strings.get(key).map(|e| e.is_live()).unwrap_or(false);
        if occupied {
            return Ok(false);
        }
        state.strings.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<bool> {
        Ok(self.state.lock().strings.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut state = self.state.lock();
        let live = state.strings.get(key).map(|e| e.is_live()).unwrap_or(false);
        if !live {
            state.strings.remove(key);
        }
        Ok(live)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut state = self.state.lock();
        match state.strings.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let state = self.state.lock();
        Ok(state.strings.get(key).and_then(|e| e.expires_at).map(|t| t.saturating_duration_since(Instant::now())))
    }

    async fn hset(&self, key: &str, field: &str, value: &[u8]) -> Result<()> {
        self.state
            .lock()
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_vec());
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.state.lock().hashes.get(key).and_then(|h| h.get(field)).cloned())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, Vec<u8>>> {
        Ok(self.state.lock().hashes.get(key).cloned().unwrap_or_default())
    }

    async fn hexists(&self, key: &str, field: &str) -> Result<bool> {
        Ok(self.state.lock().hashes.get(key).map(|h| h.contains_key(field)).unwrap_or(false))
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .hashes
            .get_mut(key)
            .map(|h| h.remove(field).is_some())
            .unwrap_or(false))
    }

    async fn hlen(&self, key: &str) -> Result<u64> {
        Ok(self.state.lock().hashes.get(key).map(|h| h.len() as u64).unwrap_or(0))
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let mut state = self.state.lock();
        let hash = state.hashes.entry(key.to_string()).or_default();
        let current = hash
            .get(field)
            .and_then(|v| std::str::from_utf8(v).ok())
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(0);
        let next = current + delta;
        hash.insert(field.to_string(), next.to_string().into_bytes());
        Ok(next)
    }

    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        let state = self.state.lock();
        let hash = state.hashes.get(key);
        Ok(fields.iter().map(|f| hash.and_then(|h| h.get(f)).cloned()).collect())
    }

    async fn sadd(&self, key: &str, member: &[u8]) -> Result<bool> {
        let mut state = self.state.lock();
        let set = state.sets.entry(key.to_string()).or_default();
        if set.iter().any(|m| m == member) {
            return Ok(false);
        }
        set.push(member.to_vec());
        Ok(true)
    }

    async fn srem(&self, key: &str, member: &[u8]) -> Result<bool> {
        let mut state = self.state.lock();
        match state.sets.get_mut(key) {
            Some(set) => {
                let before = set.len();
                set.retain(|m| m != member);
                Ok(set.len() != before)
            }
            None => Ok(false),
        }
    }

    async fn sismember(&self, key: &str, member: &[u8]) -> Result<bool> {
        Ok(self.state.lock().sets.get(key).map(|s| s.iter().any(|m| m == member)).unwrap_or(false))
    }

    async fn scard(&self, key: &str) -> Result<u64> {
        Ok(self.state.lock().sets.get(key).map(|s| s.len() as u64).unwrap_or(0))
    }

    async fn smembers(&self, key: &str) -> Result<Vec<Vec<u8>>> {
        Ok(self.state.lock().sets.get(key).cloned().unwrap_or_default())
    }

    async fn zadd(&self, key: &str, member: &[u8], score: f64) -> Result<()> {
        let mut state = self.state.lock();
        let zset = state.zsets.entry(key.to_string()).or_default();
        zset.retain(|(m, _)| m != member);
        zset.push((member.to_vec(), score));
        zset.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &[u8]) -> Result<bool> {
        let mut state = self.state.lock();
        match state.zsets.get_mut(key) {
            Some(zset) => {
                let before = zset.len();
                zset.retain(|(m, _)| m != member);
                Ok(zset.len() != before)
            }
            None => Ok(false),
        }
    }

    async fn zscore(&self, key: &str, member: &[u8]) -> Result<Option<f64>> {
        Ok(self
            .state
            .lock()
            .zsets
            .get(key)
            .and_then(|z| z.iter().find(|(m, _)| m == member).map(|(_, s)| *s)))
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<Vec<u8>>> {
        let state = self.state.lock();
        let zset = match state.zsets.get(key) {
            Some(z) => z,
            None => return Ok(Vec::new()),
        };
        let len = zset.len() as isize;
        let norm = |i: isize| -> isize {
            if i < 0 {
                (len + i).max(0)
            } else {
                i.min(len)
            }
        };
        let (s, e) = (norm(start), norm(stop) + 1);
        if s >= e {
            return Ok(Vec::new());
        }
        Ok(zset[s as usize..e.min(len) as usize].iter().map(|(m, _)| m.clone()).collect())
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        Ok(self.state.lock().zsets.get(key).map(|z| z.len() as u64).unwrap_or(0))
    }

    async fn json_set(&self, key: &str, path: &str, value: &Value, nx: bool) -> Result<bool> {
        let mut state = self.state.lock();
        let doc = state.documents.entry(key.to_string()).or_insert(Value::Null);
        Ok(json_path::set(doc, path, value.clone(), nx))
    }

    async fn json_get(&self, key: &str, path: &str) -> Result<Option<Value>> {
        let state = self.state.lock();
        Ok(state.documents.get(key).and_then(|doc| json_path::get(doc, path)).cloned())
    }

    async fn json_del(&self, key: &str, path: &str) -> Result<bool> {
        let mut state = self.state.lock();
        match state.documents.get_mut(key) {
            Some(doc) => Ok(json_path::del(doc, path)),
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn set_nx_ex_is_single_writer() {
        let store = MemoryManifestStore::new();
        assert!(store.set_nx_ex("lease", b"a", Duration::from_secs(5)).await.unwrap());
        assert!(!store.set_nx_ex("lease", b"b", Duration::from_secs(5)).await.unwrap());
        assert_eq!(store.get("lease").await.unwrap(), Some(b"a".to_vec()));
    }

    #[tokio::test]
    async fn spop_default_cas_loop_drains_set() {
        let store = MemoryManifestStore::new();
        store.sadd("pending", b"one").await.unwrap();
        store.sadd("pending", b"two").await.unwrap();
        let mut popped = vec![store.spop("pending").await.unwrap().unwrap()];
        popped.push(store.spop("pending").await.unwrap().unwrap());
        assert_eq!(store.spop("pending").await.unwrap(), None);
        popped.sort();
        assert_eq!(popped, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[tokio::test]
    async fn json_subdocument_roundtrip() {
        let store = MemoryManifestStore::new();
        store
            .json_set("Transfer::TransferManifest", ".EntityTransfers.abc", &json!({"Stage": "Prepare"}), false)
            .await
            .unwrap();
        let v = store
            .json_get("Transfer::TransferManifest", ".EntityTransfers.abc.Stage")
            .await
            .unwrap();
        assert_eq!(v, Some(json!("Prepare")));
        assert!(store.json_del("Transfer::TransferManifest", ".EntityTransfers.abc").await.unwrap());
    }
}
