//! `ServerRegistry` (C3, supporting): `identity -> reachable address`, a
//! pure hash-table wrapper over the manifest store (`spec.md` §4.8).
//! Re-registration overwrites (invariant I4).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use atlas_core::NetworkIdentity;
use atlas_manifest::ManifestStore;

use crate::error::{RegistryError, Result};

const REGISTRY_KEY: &str = "ServerRegistry";

/// `identity -> address` directory shared by every process in the
/// cluster. Acceptors consult it to authorize an inbound handshake; the
/// handoff connection manager and telemetry publisher consult it to
/// discover peers.
pub struct ServerRegistry {
    store: Arc<dyn ManifestStore>,
}

impl ServerRegistry {
    pub fn new(store: Arc<dyn ManifestStore>) -> Self {
        Self { store }
    }

    pub async fn register_self(&self, identity: NetworkIdentity, addr: SocketAddr) -> Result<()> {
        self.store
            .hset(REGISTRY_KEY, &identity.claim_key(), addr.to_string().as_bytes())
            .await?;
        Ok(())
    }

    pub async fn deregister_self(&self, identity: NetworkIdentity) -> Result<()> {
        self.store.hdel(REGISTRY_KEY, &identity.claim_key()).await?;
        Ok(())
    }

    pub async fn lookup(&self, identity: NetworkIdentity) -> Result<Option<SocketAddr>> {
        let Some(bytes) = self.store.hget(REGISTRY_KEY, &identity.claim_key()).await? else {
            return Ok(None);
        };
        let s = String::from_utf8_lossy(&bytes);
        s.parse()
            .map(Some)
            .map_err(|_| RegistryError::MalformedAddress(identity, s.into_owned()))
    }

    /// `identity -> address` for every registered process. Malformed
    /// entries are skipped rather than failing the whole snapshot — a
    /// single bad row should not block discovery of everyone else.
    pub async fn list_all(&self) -> Result<HashMap<NetworkIdentity, SocketAddr>> {
        let all = self.store.hgetall(REGISTRY_KEY).await?;
        let mut out = HashMap::with_capacity(all.len());
        for (key, value) in all {
            let Ok(identity) = key.parse::<NetworkIdentity>() else {
                continue;
            };
            let Ok(addr) = String::from_utf8_lossy(&value).parse::<SocketAddr>() else {
                continue;
            };
            out.insert(identity, addr);
        }
        Ok(out)
    }

    /// `list_all` filtered to shards other than `self_identity`, the
    /// peer-discovery call the handoff connection manager uses to pick a
    /// liveness-probe target (`spec.md` §4.6).
    pub async fn list_other_shards(&self, self_identity: NetworkIdentity) -> Result<Vec<(NetworkIdentity, SocketAddr)>> {
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .filter(|(id, _)| *id != self_identity && id.role == atlas_core::Role::Shard)
            .collect())
    }
}
