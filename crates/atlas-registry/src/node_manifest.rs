//! `NodeManifest` (supplement, `spec.md` §4.8 / SPEC_FULL §4.8): a small
//! per-shard JSON document recording operational placement
//! (`{nodeName, podName, podIp}`), written under `Node Manifest
//! Shard_Node` purely for `apps/coordinator`'s dashboard query surface.
//! Not on the hot path of any invariant.

use std::sync::Arc;

use atlas_core::NetworkIdentity;
use atlas_manifest::ManifestStore;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::Result;

const NODE_MANIFEST_KEY: &str = "Node Manifest Shard_Node";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NodePlacement {
    pub node_name: String,
    pub pod_name: String,
    pub pod_ip: String,
}

pub struct NodeManifest {
    store: Arc<dyn ManifestStore>,
}

impl NodeManifest {
    pub fn new(store: Arc<dyn ManifestStore>) -> Self {
        Self { store }
    }

    pub async fn publish(&self, identity: NetworkIdentity, placement: &NodePlacement) -> Result<()> {
        let doc = json!({
            "nodeName": placement.node_name,
            "podName": placement.pod_name,
            "podIp": placement.pod_ip,
        });
        let bytes = serde_json::to_vec(&doc)?;
        self.store.hset(NODE_MANIFEST_KEY, &identity.claim_key(), &bytes).await?;
        Ok(())
    }

    pub async fn get(&self, identity: NetworkIdentity) -> Result<Option<NodePlacement>> {
        let Some(bytes) = self.store.hget(NODE_MANIFEST_KEY, &identity.claim_key()).await? else {
            return Ok(None);
        };
        let v: serde_json::Value = serde_json::from_slice(&bytes)?;
        Ok(Some(NodePlacement {
            node_name: v["nodeName"].as_str().unwrap_or_default().to_string(),
            pod_name: v["podName"].as_str().unwrap_or_default().to_string(),
            pod_ip: v["podIp"].as_str().unwrap_or_default().to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_core::identity::Role;
    use atlas_manifest::MemoryManifestStore;

    #[tokio::test]
    async fn publish_then_get_roundtrips() {
        let m = NodeManifest::new(Arc::new(MemoryManifestStore::new()));
        let id = NetworkIdentity::generate(Role::Shard);
        let placement = NodePlacement {
            node_name: "node-1".into(),
            pod_name: "atlas-shard-7f".into(),
            pod_ip: "10.1.2.3".into(),
        };
        m.publish(id, &placement).await.unwrap();
        assert_eq!(m.get(id).await.unwrap(), Some(placement));
    }
}
