//! `RoutingManifest` (`spec.md` §4.8): tracks which proxy owns which
//! clients. The client->proxy hash and the proxy->clients set are always
//! updated together so the two tables never drift out of sync.

use std::collections::HashSet;
use std::sync::Arc;

use atlas_manifest::ManifestStore;
use uuid::Uuid;

use crate::error::Result;

const CLIENT_TO_PROXY_KEY: &str = "Routing::ClientID→Proxy";

fn proxy_clients_key(proxy: Uuid) -> String {
    format!("Routing::Proxy::{proxy}_Clients")
}

pub struct RoutingManifest {
    store: Arc<dyn ManifestStore>,
}

impl RoutingManifest {
    pub fn new(store: Arc<dyn ManifestStore>) -> Self {
        Self { store }
    }

    /// Assigns `client` to `proxy`, updating both tables. If the client
    /// was already assigned to a different proxy, that stale membership
    /// is removed first so a client never appears under two proxies.
    pub async fn assign_client(&self, client: Uuid, proxy: Uuid) -> Result<()> {
        if let Some(previous) = self.proxy_for_client(client).await? {
            if previous != proxy {
                self.store.srem(&proxy_clients_key(previous), client.as_bytes()).await?;
            }
        }
        self.store
            .hset(CLIENT_TO_PROXY_KEY, &client.to_string(), proxy.as_bytes())
            .await?;
        self.store.sadd(&proxy_clients_key(proxy), client.as_bytes()).await?;
        Ok(())
    }

    pub async fn unassign_client(&self, client: Uuid) -> Result<()> {
        if let Some(proxy) = self.proxy_for_client(client).await? {
            self.store.srem(&proxy_clients_key(proxy), client.as_bytes()).await?;
        }
        self.store.hdel(CLIENT_TO_PROXY_KEY, &client.to_string()).await?;
        Ok(())
    }

    pub async fn proxy_for_client(&self, client: Uuid) -> Result<Option<Uuid>> {
        let Some(bytes) = self.store.hget(CLIENT_TO_PROXY_KEY, &client.to_string()).await? else {
            return Ok(None);
        };
        Ok(Uuid::from_slice(&bytes).ok())
    }

    pub async fn clients_for_proxy(&self, proxy: Uuid) -> Result<HashSet<Uuid>> {
        let members = self.store.smembers(&proxy_clients_key(proxy)).await?;
        Ok(members.iter().filter_map(|m| Uuid::from_slice(m).ok()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_manifest::MemoryManifestStore;

    fn manifest() -> RoutingManifest {
        RoutingManifest::new(Arc::new(MemoryManifestStore::new()))
    }

    #[tokio::test]
    async fn assign_keeps_both_tables_consistent() {
        let r = manifest();
        let client = Uuid::new_v4();
        let proxy = Uuid::new_v4();
        r.assign_client(client, proxy).await.unwrap();

        assert_eq!(r.proxy_for_client(client).await.unwrap(), Some(proxy));
        assert!(r.clients_for_proxy(proxy).await.unwrap().contains(&client));
    }

    #[tokio::test]
    async fn reassigning_moves_client_out_of_old_proxy_set() {
        let r = manifest();
        let client = Uuid::new_v4();
        let (proxy_a, proxy_b) = (Uuid::new_v4(), Uuid::new_v4());
        r.assign_client(client, proxy_a).await.unwrap();
        r.assign_client(client, proxy_b).await.unwrap();

        assert!(!r.clients_for_proxy(proxy_a).await.unwrap().contains(&client));
        assert!(r.clients_for_proxy(proxy_b).await.unwrap().contains(&client));
    }

    #[tokio::test]
    async fn unassign_clears_both_tables() {
        let r = manifest();
        let client = Uuid::new_v4();
        let proxy = Uuid::new_v4();
        r.assign_client(client, proxy).await.unwrap();
        r.unassign_client(client).await.unwrap();

        assert_eq!(r.proxy_for_client(client).await.unwrap(), None);
        assert!(!r.clients_for_proxy(proxy).await.unwrap().contains(&client));
    }
}
