//! Abstraction over the transport's send path, so the coordinator's state
//! machine can be driven in tests without real sockets.

use async_trait::async_trait;
use atlas_core::NetworkIdentity;
use atlas_net::packet::Packet;
use atlas_net::transport::SendFlag;

#[async_trait]
pub trait PacketSender: Send + Sync {
    async fn send(&self, peer: NetworkIdentity, packet: Packet, flag: SendFlag) -> anyhow::Result<()>;
}

#[async_trait]
impl PacketSender for atlas_net::transport::Transport {
    async fn send(&self, peer: NetworkIdentity, packet: Packet, flag: SendFlag) -> anyhow::Result<()> {
        Ok(self.send_message(&peer, &packet, flag).await?)
    }
}
