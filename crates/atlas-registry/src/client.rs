//! `ClientManifest` (`spec.md` §4.8): client->IP and client->controlled
//! entity mappings. Straightforward CRUD over the manifest store.

use std::net::IpAddr;
use std::sync::Arc;

use atlas_core::AtlasEntityId;
use atlas_manifest::ManifestStore;
use uuid::Uuid;

use crate::error::Result;

const CLIENT_TO_IP_KEY: &str = "Client::ClientID→IP";
const CLIENT_TO_ENTITY_KEY: &str = "Client::ClientID→EntityID";

pub struct ClientManifest {
    store: Arc<dyn ManifestStore>,
}

impl ClientManifest {
    pub fn new(store: Arc<dyn ManifestStore>) -> Self {
        Self { store }
    }

    pub async fn set_client_ip(&self, client: Uuid, ip: IpAddr) -> Result<()> {
        self.store
            .hset(CLIENT_TO_IP_KEY, &client.to_string(), ip.to_string().as_bytes())
            .await?;
        Ok(())
    }

    pub async fn client_ip(&self, client: Uuid) -> Result<Option<IpAddr>> {
        let Some(bytes) = self.store.hget(CLIENT_TO_IP_KEY, &client.to_string()).await? else {
            return Ok(None);
        };
        Ok(String::from_utf8_lossy(&bytes).parse().ok())
    }

    pub async fn set_controlled_entity(&self, client: Uuid, entity_id: AtlasEntityId) -> Result<()> {
        self.store
            .hset(CLIENT_TO_ENTITY_KEY, &client.to_string(), entity_id.0.as_bytes())
            .await?;
        Ok(())
    }

    pub async fn controlled_entity(&self, client: Uuid) -> Result<Option<AtlasEntityId>> {
        let Some(bytes) = self.store.hget(CLIENT_TO_ENTITY_KEY, &client.to_string()).await? else {
            return Ok(None);
        };
        Ok(Uuid::from_slice(&bytes).ok().map(AtlasEntityId))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_manifest::MemoryManifestStore;

    #[tokio::test]
    async fn ip_and_entity_roundtrip() {
        let m = ClientManifest::new(Arc::new(MemoryManifestStore::new()));
        let client = Uuid::new_v4();
        let ip: IpAddr = "10.0.0.5".parse().unwrap();
        let entity = AtlasEntityId::new();

        m.set_client_ip(client, ip).await.unwrap();
        m.set_controlled_entity(client, entity).await.unwrap();

        assert_eq!(m.client_ip(client).await.unwrap(), Some(ip));
        assert_eq!(m.controlled_entity(client).await.unwrap(), Some(entity));
    }

    #[tokio::test]
    async fn unknown_client_returns_none() {
        let m = ClientManifest::new(Arc::new(MemoryManifestStore::new()));
        assert_eq!(m.client_ip(Uuid::new_v4()).await.unwrap(), None);
    }
}
