//! `ServerCommandBus` (`spec.md` §4.8): iterates batched
//! `CommandPayloadPacket`s and, per packet, looks up the client's proxy
//! via `RoutingManifest` and sends the packet reliably-batched to that
//! proxy. Anchors the message-routing contract the registry tables exist
//! to serve; not part of the hard transfer/leasing core.

use std::sync::Arc;

use async_trait::async_trait;
use atlas_core::NetworkIdentity;
use atlas_net::packet::{CommandPayloadPacket, Packet};
use atlas_net::transport::SendFlag;
use tracing::warn;

use crate::error::Result;
use crate::routing::RoutingManifest;

/// Narrow send capability so the command bus can be driven in tests
/// without a real transport, mirroring `atlas-transfer::PacketSender`.
#[async_trait]
pub trait CommandSender: Send + Sync {
    async fn send(&self, peer: NetworkIdentity, packet: Packet, flag: SendFlag) -> anyhow::Result<()>;
}

#[async_trait]
impl CommandSender for atlas_net::transport::Transport {
    async fn send(&self, peer: NetworkIdentity, packet: Packet, flag: SendFlag) -> anyhow::Result<()> {
        Ok(self.send_message(&peer, &packet, flag).await?)
    }
}

pub struct ServerCommandBus {
    routing: Arc<RoutingManifest>,
    sender: Arc<dyn CommandSender>,
}

impl ServerCommandBus {
    pub fn new(routing: Arc<RoutingManifest>, sender: Arc<dyn CommandSender>) -> Self {
        Self { routing, sender }
    }

    /// Routes a batch of commands to each command's client's proxy. A
    /// client with no known proxy assignment is dropped with a warning
    /// rather than failing the whole batch.
    pub async fn route_batch(&self, commands: Vec<CommandPayloadPacket>) -> Result<()> {
        for command in commands {
            let client_id = command.client_id;
            match self.routing.proxy_for_client(client_id).await? {
                Some(proxy_uuid) => {
                    let proxy = NetworkIdentity::new(atlas_core::Role::Proxy, proxy_uuid);
                    let packet = Packet::CommandPayload(command);
                    if self.sender.send(proxy, packet, SendFlag::ReliableBatched).await.is_err() {
                        warn!(%client_id, %proxy, "failed to route command to proxy");
                    }
                }
                None => warn!(%client_id, "no proxy assignment for client, dropping command"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_manifest::MemoryManifestStore;
    use tokio::sync::Mutex as AsyncMutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingSender {
        sent: AsyncMutex<Vec<(NetworkIdentity, Packet)>>,
    }

    #[async_trait]
    impl CommandSender for RecordingSender {
        async fn send(&self, peer: NetworkIdentity, packet: Packet, _flag: SendFlag) -> anyhow::Result<()> {
            self.sent.lock().await.push((peer, packet));
            Ok(())
        }
    }

    #[tokio::test]
    async fn routes_command_to_assigned_proxy() {
        let store = Arc::new(MemoryManifestStore::new());
        let routing = Arc::new(RoutingManifest::new(store));
        let client = Uuid::new_v4();
        let proxy = Uuid::new_v4();
        routing.assign_client(client, proxy).await.unwrap();

        let sender = Arc::new(RecordingSender::default());
        let bus = ServerCommandBus::new(routing, sender.clone());
        bus.route_batch(vec![CommandPayloadPacket {
            client_id: client,
            command: vec![1, 2, 3],
        }])
        .await
        .unwrap();

        let sent = sender.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.uuid, proxy);
    }

    #[tokio::test]
    async fn unassigned_client_is_dropped_not_fatal() {
        let store = Arc::new(MemoryManifestStore::new());
        let routing = Arc::new(RoutingManifest::new(store));
        let sender = Arc::new(RecordingSender::default());
        let bus = ServerCommandBus::new(routing, sender.clone());

        bus.route_batch(vec![CommandPayloadPacket {
            client_id: Uuid::new_v4(),
            command: vec![],
        }])
        .await
        .unwrap();

        assert!(sender.sent.lock().await.is_empty());
    }
}
