//! `HandoffConnectionManager` (C9, `spec.md` §4.6): liveness probing,
//! inactivity reaping, and the symmetric connection-lease protocol that
//! keeps two shards from both initiating a connection to each other.
//! Grounded in the original `HandoffConnectionManager.cpp`'s
//! `SelectTestTargetShard`/`Tick`/`Shutdown` structure and
//! `HandoffConnectionLeaseCoordinator`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use atlas_core::{lease_key, NetworkIdentity};
use atlas_manifest::ManifestStore;
use atlas_net::packet::{HandoffPingPacket, Packet};
use atlas_net::transport::{AllowAllAuthorizer, SendFlag, Transport};
use atlas_registry::ServerRegistry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;

const LEASE_PREFIX: &str = "HandoffConnectionLease";

#[derive(Clone, Copy, Debug)]
pub struct HandoffConfig {
    pub probe_interval: Duration,
    pub inactivity_timeout: Duration,
    pub lease_ttl: Duration,
    /// Advisory lease protocol, default ON (`spec.md` §4.6). Disabling it
    /// does not affect correctness, only flap-avoidance.
    pub lease_enabled: bool,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        let probe_interval = Duration::from_secs(5);
        Self {
            probe_interval,
            inactivity_timeout: Duration::from_secs(30),
            lease_ttl: probe_interval * 3,
            lease_enabled: true,
        }
    }
}

/// Per-shard connection lifecycle manager: probes peer liveness, reaps
/// inactive connections, and brokers the advisory connection lease so
/// two shards don't both dial each other at once.
pub struct HandoffConnectionManager {
    store: Arc<dyn ManifestStore>,
    transport: Arc<Transport>,
    registry: Arc<ServerRegistry>,
    self_identity: NetworkIdentity,
    config: HandoffConfig,
    probe_cursor: AtomicUsize,
}

impl HandoffConnectionManager {
    pub fn new(
        store: Arc<dyn ManifestStore>,
        transport: Arc<Transport>,
        registry: Arc<ServerRegistry>,
        self_identity: NetworkIdentity,
        config: HandoffConfig,
    ) -> Self {
        Self {
            store,
            transport,
            registry,
            self_identity,
            config,
            probe_cursor: AtomicUsize::new(0),
        }
    }

    fn lease_key_for(&self, peer: NetworkIdentity) -> String {
        lease_key(LEASE_PREFIX, &self.self_identity, &peer)
    }

    /// `GET`s the lease key: absent -> `SET NX EX`; present and owned by
    /// self -> refresh `EXPIRE`; owned by the peer -> rejected
    /// (`spec.md` §4.6). Correctness of the handoff protocol never
    /// depends on this; it only reduces connection flapping.
    pub async fn try_acquire_or_refresh_lease(&self, peer: NetworkIdentity) -> Result<bool> {
        let key = self.lease_key_for(peer);
        let self_bytes = self.self_identity.claim_key().into_bytes();
        match self.store.get(&key).await? {
            None => Ok(self.store.set_nx_ex(&key, &self_bytes, self.config.lease_ttl).await?),
            Some(owner) if owner == self_bytes => {
                self.store.expire(&key, self.config.lease_ttl).await?;
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }

    /// Releases the lease if (and only if) this shard is the current
    /// owner, called on shutdown or reap.
    pub async fn release_lease(&self, peer: NetworkIdentity) -> Result<()> {
        let key = self.lease_key_for(peer);
        let self_bytes = self.self_identity.claim_key().into_bytes();
        if self.store.get(&key).await? == Some(self_bytes) {
            self.store.del(&key).await?;
        }
        Ok(())
    }

    /// Picks the next peer from the registry's discovered shard list
    /// (round-robin), ensures a connection, and pings it. Skips the
    /// dial entirely if the connection lease says the peer already owns
    /// the initiative.
    pub async fn probe_once(&self, addr_for: impl Fn(NetworkIdentity) -> Option<std::net::SocketAddr>) -> Result<()> {
        let peers = self.registry.list_other_shards(self.self_identity).await?;
        if peers.is_empty() {
            return Ok(());
        }
        let idx = self.probe_cursor.fetch_add(1, Ordering::Relaxed) % peers.len();
        let (peer, registry_addr) = peers[idx];

        if !self.transport.is_connected(&peer) {
            if self.config.lease_enabled && !self.try_acquire_or_refresh_lease(peer).await? {
                debug!(%peer, "peer holds the connection lease, not dialing");
                return Ok(());
            }
            let addr = addr_for(peer).unwrap_or(registry_addr);
            if let Err(e) = self.transport.establish_connection_to(peer, addr).await {
                warn!(%peer, error = %e, "liveness probe failed to establish connection");
                return Ok(());
            }
        }

        let sent_at_ms = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64;
        let packet = Packet::HandoffPing(HandoffPingPacket {
            sender: self.self_identity,
            sent_at_ms,
        });
        self.transport.send_message(&peer, &packet, SendFlag::ReliableNow).await.ok();
        Ok(())
    }

    /// Called by the packet dispatcher on receipt of a `HandoffPingPacket`:
    /// logs RTT and marks activity for the sender.
    pub fn handle_ping(&self, ping: &HandoffPingPacket) {
        let now_ms = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64;
        let rtt_ms = now_ms.saturating_sub(ping.sent_at_ms) as f64;
        self.transport.record_ping_ms(&ping.sender, rtt_ms);
        self.transport.mark_connection_activity(&ping.sender);
        debug!(peer = %ping.sender, rtt_ms, "handoff ping received");
    }

    /// Every tick: closes and releases the lease for any peer whose last
    /// activity exceeds `inactivity_timeout`.
    pub async fn reap_inactive(&self) -> Result<()> {
        for peer in self.transport.connected_peers() {
            let Some(last) = self.transport.last_activity(&peer) else {
                continue;
            };
            if last.elapsed() > self.config.inactivity_timeout {
                info!(%peer, "reaping inactive connection");
                self.transport.close_connection_to(&peer);
                if self.config.lease_enabled {
                    self.release_lease(peer).await?;
                }
            }
        }
        Ok(())
    }

    /// Combined probe + reap loop. Probing happens on `probe_interval`;
    /// reaping happens every iteration of a faster inner tick so short
    /// `inactivity_timeout`s in tests are still honored promptly.
    pub async fn run(self: Arc<Self>, stop: CancellationToken) {
        let reap_period = (self.config.inactivity_timeout / 4).max(Duration::from_millis(50));
        let mut since_last_probe = Duration::ZERO;

        loop {
            if stop.is_cancelled() {
                return;
            }

            if let Err(e) = self.reap_inactive().await {
                warn!(error = %e, "inactivity reap failed");
            }

            if since_last_probe >= self.config.probe_interval {
                if let Err(e) = self.probe_once(|_| None).await {
                    warn!(error = %e, "liveness probe failed");
                }
                since_last_probe = Duration::ZERO;
            }

            tokio::select! {
                _ = tokio::time::sleep(reap_period) => { since_last_probe += reap_period; }
                _ = stop.cancelled() => return,
            }
        }
    }

    /// Deregisters and releases every lease this shard owns. Called from
    /// the process-wide shutdown path (`spec.md` §5/§7).
    pub async fn shutdown(&self) -> Result<()> {
        for peer in self.transport.connected_peers() {
            if self.config.lease_enabled {
                self.release_lease(peer).await?;
            }
            self.transport.close_connection_to(&peer);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_core::identity::Role;
    use atlas_manifest::MemoryManifestStore;

    fn manager() -> (Arc<HandoffConnectionManager>, Arc<Transport>) {
        let store = Arc::new(MemoryManifestStore::new());
        let registry = Arc::new(ServerRegistry::new(store.clone()));
        let identity = NetworkIdentity::generate(Role::Shard);
        let (transport, _rx) = Transport::new(identity, "127.0.0.1:0".parse().unwrap(), Arc::new(AllowAllAuthorizer));
        let manager = Arc::new(HandoffConnectionManager::new(
            store,
            transport.clone(),
            registry,
            identity,
            HandoffConfig::default(),
        ));
        (manager, transport)
    }

    #[tokio::test]
    async fn lease_is_mutually_exclusive_between_two_callers() {
        let store = Arc::new(MemoryManifestStore::new());
        let registry = Arc::new(ServerRegistry::new(store.clone()));
        let a = NetworkIdentity::generate(Role::Shard);
        let b = NetworkIdentity::generate(Role::Shard);
        let (transport_a, _) = Transport::new(a, "127.0.0.1:0".parse().unwrap(), Arc::new(AllowAllAuthorizer));
        let (transport_b, _) = Transport::new(b, "127.0.0.1:0".parse().unwrap(), Arc::new(AllowAllAuthorizer));
        let mgr_a = HandoffConnectionManager::new(store.clone(), transport_a, registry.clone(), a, HandoffConfig::default());
        let mgr_b = HandoffConnectionManager::new(store, transport_b, registry, b, HandoffConfig::default());

        let a_got = mgr_a.try_acquire_or_refresh_lease(b).await.unwrap();
        let b_got = mgr_b.try_acquire_or_refresh_lease(a).await.unwrap();
        assert!(a_got);
        assert!(!b_got);

        assert!(mgr_a.try_acquire_or_refresh_lease(b).await.unwrap());
    }

    #[tokio::test]
    async fn release_only_succeeds_for_the_owner() {
        let (manager, _transport) = manager();
        let peer = NetworkIdentity::generate(Role::Shard);
        assert!(manager.try_acquire_or_refresh_lease(peer).await.unwrap());
        manager.release_lease(peer).await.unwrap();
        assert!(manager.try_acquire_or_refresh_lease(peer).await.unwrap());
    }

    #[tokio::test]
    async fn probe_with_no_registered_peers_is_a_noop() {
        let (manager, _transport) = manager();
        manager.probe_once(|_| None).await.unwrap();
    }
}
