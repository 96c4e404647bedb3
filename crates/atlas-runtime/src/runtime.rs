//! `ShardRuntime` (C1-C10 wiring): owns one instance of every subsystem
//! and drives the inbound packet dispatch loop. Explicit-context
//! replacement for a process-wide singleton — a deployment can run
//! several `ShardRuntime`s in one process (e.g. in `tests/`) without
//! them fighting over global state.

use std::net::SocketAddr;
use std::sync::Arc;

use atlas_core::{Bound, NetworkIdentity, TickSource};
use atlas_entity::EntityLedger;
use atlas_handoff::HandoffConnectionManager;
use atlas_heuristic::{BoundLeaser, HeuristicManifest};
use atlas_manifest::ManifestStore;
use atlas_net::packet::Packet;
use atlas_net::transport::{IdentityAuthorizer, SendFlag, Transport, TransportEvent};
use atlas_registry::ServerRegistry;
use atlas_telemetry::TelemetryPublisher;
use atlas_transfer::TransferCoordinator;
use parking_lot::Mutex as SyncMutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ShardRuntimeConfig;
use crate::error::Result;

/// Bridges `Transport`'s accept-time membership check to `ServerRegistry`
/// (`spec.md` §6: the acceptor verifies the identity is present in
/// `ServerRegistry` before accepting). Lives here rather than in
/// `atlas-net` because `atlas-registry` already depends on `atlas-net`;
/// a direct `Transport -> ServerRegistry` dependency would cycle.
struct RegistryAuthorizer(Arc<ServerRegistry>);

#[async_trait::async_trait]
impl IdentityAuthorizer for RegistryAuthorizer {
    async fn is_registered(&self, identity: NetworkIdentity) -> bool {
        matches!(self.0.lookup(identity).await, Ok(Some(_)))
    }
}

/// Everything one shard process needs, minus the network address it
/// ends up bound to (that is only known after [`ShardRuntime::start`]).
pub struct ShardRuntime<B> {
    store: Arc<dyn ManifestStore>,
    transport: Arc<Transport>,
    self_identity: NetworkIdentity,
    tick: Arc<TickSource>,
    heuristic: Arc<HeuristicManifest<B>>,
    leaser: Arc<BoundLeaser<B>>,
    ledger: Arc<EntityLedger>,
    coordinator: Arc<TransferCoordinator<B>>,
    handoff: Arc<HandoffConnectionManager>,
    telemetry: Arc<TelemetryPublisher>,
    registry: Arc<ServerRegistry>,
    to_parse_tx: mpsc::Sender<atlas_core::AtlasEntityId>,
    to_parse_rx: SyncMutex<Option<mpsc::Receiver<atlas_core::AtlasEntityId>>>,
    event_rx: SyncMutex<Option<mpsc::Receiver<TransportEvent>>>,
    config: ShardRuntimeConfig,
}

impl<B> ShardRuntime<B>
where
    B: Bound + Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(
        self_identity: NetworkIdentity,
        listen_addr: SocketAddr,
        store: Arc<dyn ManifestStore>,
        config: ShardRuntimeConfig,
    ) -> Arc<Self> {
        let registry = Arc::new(ServerRegistry::new(store.clone()));
        let (transport, event_rx) = Transport::new(
            self_identity,
            listen_addr,
            Arc::new(RegistryAuthorizer(registry.clone())),
        );
        let tick = Arc::new(TickSource::new());
        let heuristic = Arc::new(HeuristicManifest::<B>::new(store.clone()));
        let leaser = Arc::new(
            BoundLeaser::new(heuristic.clone(), self_identity).with_poll_interval(config.bound_poll_interval),
        );
        let ledger = Arc::new(EntityLedger::new());
        let coordinator = Arc::new(TransferCoordinator::new(
            ledger.clone(),
            heuristic.clone(),
            store.clone(),
            transport.clone() as Arc<dyn atlas_transfer::PacketSender>,
            self_identity,
            tick.clone(),
            config.transfer,
        ));
        let handoff = Arc::new(HandoffConnectionManager::new(
            store.clone(),
            transport.clone(),
            registry.clone(),
            self_identity,
            config.handoff,
        ));
        let telemetry = Arc::new(
            TelemetryPublisher::new(store.clone(), transport.clone(), ledger.clone(), self_identity)
                .with_period(config.telemetry_period),
        );
        let (to_parse_tx, to_parse_rx) = mpsc::channel(1024);

        Arc::new(Self {
            store,
            transport,
            self_identity,
            tick,
            heuristic,
            leaser,
            ledger,
            coordinator,
            handoff,
            telemetry,
            registry,
            to_parse_tx,
            to_parse_rx: SyncMutex::new(Some(to_parse_rx)),
            event_rx: SyncMutex::new(Some(event_rx)),
            config,
        })
    }

    pub fn self_identity(&self) -> NetworkIdentity {
        self.self_identity
    }

    pub fn ledger(&self) -> &Arc<EntityLedger> {
        &self.ledger
    }

    pub fn leaser(&self) -> &Arc<BoundLeaser<B>> {
        &self.leaser
    }

    pub fn heuristic(&self) -> &Arc<HeuristicManifest<B>> {
        &self.heuristic
    }

    pub fn registry(&self) -> &Arc<ServerRegistry> {
        &self.registry
    }

    pub fn tick(&self) -> &Arc<TickSource> {
        &self.tick
    }

    /// Binds the listen socket, registers this shard in the directory, and
    /// spawns every background loop (C5 bound leasing, C7 scan, C8
    /// transfer tick, C9 handoff, C10 telemetry) plus the inbound packet
    /// dispatcher. Returns the address actually bound.
    pub async fn start(self: &Arc<Self>, stop: CancellationToken) -> Result<SocketAddr> {
        let bound_addr = self.transport.init().await?;
        self.registry.register_self(self.self_identity, bound_addr).await?;

        tokio::spawn(Arc::clone(&self.leaser).run(stop.clone()));

        let leaser_for_scan = Arc::clone(&self.leaser);
        let coordinator_for_scan = Arc::clone(&self.coordinator);
        let bound_test = move |point: glam::Vec3| -> Option<bool> {
            leaser_for_scan.get_bound().map(|b| b.contains(point))
        };
        let in_transfer_test = move |id: &atlas_core::AtlasEntityId| coordinator_for_scan.is_in_transfer(id);
        tokio::spawn(Arc::clone(&self.ledger).run_scan_loop(
            bound_test,
            in_transfer_test,
            self.to_parse_tx.clone(),
            self.config.entity_scan_period,
            stop.clone(),
        ));

        let to_parse_rx = self
            .to_parse_rx
            .lock()
            .take()
            .expect("ShardRuntime::start called twice");
        tokio::spawn(Arc::clone(&self.coordinator).run(to_parse_rx, self.config.transfer_tick_period, stop.clone()));

        tokio::spawn(Arc::clone(&self.handoff).run(stop.clone()));
        tokio::spawn(Arc::clone(&self.telemetry).run(stop.clone()));

        let event_rx = self.event_rx.lock().take().expect("ShardRuntime::start called twice");
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move { dispatcher.dispatch_loop(event_rx, stop).await });

        Ok(bound_addr)
    }

    async fn dispatch_loop(self: Arc<Self>, mut event_rx: mpsc::Receiver<TransportEvent>, stop: CancellationToken) {
        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    let Some(event) = event else { return };
                    self.handle_event(event).await;
                }
                _ = stop.cancelled() => return,
            }
        }
    }

    async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connecting(peer) => debug!(%peer, "dialing"),
            TransportEvent::Connected(peer) => info!(%peer, "peer connected"),
            TransportEvent::Disconnected(peer) => info!(%peer, "peer disconnected"),
            TransportEvent::Message { from, packet } => self.handle_packet(from, packet).await,
        }
    }

    async fn handle_packet(&self, from: NetworkIdentity, packet: Packet) {
        use atlas_net::packet::TransferStageData;
        match packet {
            Packet::EntityTransfer(p) => {
                let result = match p.data {
                    TransferStageData::Prepare(_) => self.coordinator.handle_prepare(from, p.transfer_id).await,
                    TransferStageData::Ready => self.coordinator.handle_ready(from, p.transfer_id),
                    TransferStageData::Commit(snapshots) => {
                        self.coordinator.handle_commit(from, p.transfer_id, snapshots).await
                    }
                    TransferStageData::Complete => self.coordinator.handle_complete(p.transfer_id).await,
                };
                if let Err(e) = result {
                    warn!(%from, error = %e, "entity transfer packet handling failed");
                }
            }
            Packet::HandoffPing(ping) => self.handoff.handle_ping(&ping),
            Packet::LocalEntityListRequest(req) => {
                let reply = self.ledger.build_list_reply(req.request_id, req.full);
                if let Err(e) = self
                    .transport
                    .send_message(&from, &Packet::LocalEntityListReply(reply), SendFlag::ReliableNow)
                    .await
                {
                    warn!(%from, error = %e, "failed to reply to entity list request");
                }
            }
            Packet::LocalEntityListReply(_) | Packet::GenericEntity(_) | Packet::CommandPayload(_) => {}
        }
    }

    /// Graceful exit (`spec.md` §3/§5/§7): releases any held bound back to
    /// pending, closes every connection lease, and drops this shard from
    /// the registry.
    pub async fn shutdown(&self) -> Result<()> {
        if self.leaser.has_bound() {
            self.heuristic.release_bound(&self.self_identity.claim_key()).await?;
            self.leaser.forget();
        }
        self.handoff.shutdown().await?;
        self.registry.deregister_self(self.self_identity).await?;
        Ok(())
    }
}
