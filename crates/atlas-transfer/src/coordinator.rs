//! `TransferCoordinator` (C8): the hard subsystem. One background task per
//! shard drives `parse_entities_for_targets` → `transfer_tick` → incoming
//! adoption every tick (`spec.md` §4.5).

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use atlas_core::{
    AtlasEntity, AtlasEntityId, Bound, EntityTransferRecord, NetworkIdentity, PendingIncomingHandoff, TickSource,
    TransferId, TransferStage,
};
use atlas_entity::EntityLedger;
use atlas_heuristic::HeuristicManifest;
use atlas_manifest::ManifestStore;
use atlas_net::packet::{EntityTransferPacket, Packet, TransferStageData};
use atlas_net::transport::SendFlag;
use base64::Engine;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ProtocolError;
use crate::sender::PacketSender;
use crate::state::TransferState;

const TRANSFER_MANIFEST_KEY: &str = "Transfer::TransferManifest";

fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Tunables named directly in `spec.md` §4.5.2/§4.5.3.
#[derive(Clone, Copy, Debug)]
pub struct TransferConfig {
    pub prepare_timeout: Duration,
    pub max_prepare_retries: u32,
    pub commit_timeout: Duration,
    pub handoff_lead_ticks: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            prepare_timeout: Duration::from_millis(500),
            max_prepare_retries: 5,
            commit_timeout: Duration::from_secs(2),
            handoff_lead_ticks: 6,
        }
    }
}

/// Per shard: the single owner of `transfers`, `entities_in_transfer`, and
/// the receiver-side `pending_incoming` map. Generic over the bound shape
/// `B` so it can resolve `heuristic.query_position`/`claimer_from_bound`
/// without depending on a concrete geometry.
pub struct TransferCoordinator<B> {
    state: Mutex<TransferState>,
    pending_incoming: Mutex<HashMap<AtlasEntityId, PendingIncomingHandoff>>,
    ledger: Arc<EntityLedger>,
    heuristic: Arc<HeuristicManifest<B>>,
    store: Arc<dyn ManifestStore>,
    sender: Arc<dyn PacketSender>,
    self_identity: NetworkIdentity,
    tick: Arc<TickSource>,
    config: TransferConfig,
    _shape: PhantomData<B>,
}

impl<B> TransferCoordinator<B>
where
    B: Bound + Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(
        ledger: Arc<EntityLedger>,
        heuristic: Arc<HeuristicManifest<B>>,
        store: Arc<dyn ManifestStore>,
        sender: Arc<dyn PacketSender>,
        self_identity: NetworkIdentity,
        tick: Arc<TickSource>,
        config: TransferConfig,
    ) -> Self {
        Self {
            state: Mutex::new(TransferState::default()),
            pending_incoming: Mutex::new(HashMap::new()),
            ledger,
            heuristic,
            store,
            sender,
            self_identity,
            tick,
            config,
            _shape: PhantomData,
        }
    }

    pub fn is_in_transfer(&self, id: &AtlasEntityId) -> bool {
        self.state.lock().entities_in_transfer.contains_key(id)
    }

    pub fn outstanding_count(&self) -> usize {
        self.state.lock().len()
    }

    // -------------------------------------------------------------------
    // 4.5.1 parse_entities_for_targets
    // -------------------------------------------------------------------

    pub async fn parse_entities_for_targets(&self, drained: Vec<AtlasEntityId>) -> Result<(), ProtocolError> {
        let mut by_bound: HashMap<atlas_core::BoundsId, Vec<AtlasEntityId>> = HashMap::new();

        for entity_id in drained {
            if self.is_in_transfer(&entity_id) {
                continue;
            }
            let Some(is_client) = self.ledger.is_client(&entity_id) else {
                continue;
            };
            if is_client {
                warn!(%entity_id, "client handoff not supported, dropping from transfer queue");
                continue;
            }
            let Some(entity) = self.ledger.get(&entity_id) else {
                continue;
            };
            let Some(bound_id) = self.heuristic.query_position(entity.transform.position).await? else {
                continue;
            };
            by_bound.entry(bound_id).or_default().push(entity_id);
        }

        for (bound_id, batch) in by_bound {
            let receiver = match self.heuristic.claimer_from_bound(bound_id).await? {
                Some(id) if id != self.self_identity => id,
                _ => continue,
            };

            let record = EntityTransferRecord::new(receiver, batch);
            self.publish_transfer_json(&record).await?;
            info!(transfer_id = %record.id, %receiver, count = record.entity_ids.len(), "opened transfer record");
            self.state.lock().insert(record);
        }

        Ok(())
    }

    // -------------------------------------------------------------------
    // 4.5.2 transfer_tick — sender state machine
    // -------------------------------------------------------------------

    pub async fn transfer_tick(&self) -> Result<(), ProtocolError> {
        let none_ids = self.state.lock().ids_in_stage(TransferStage::None);
        for id in none_ids {
            self.send_prepare(id).await?;
        }

        let prepare_ids = self.state.lock().ids_in_stage(TransferStage::Prepare);
        for id in prepare_ids {
            self.poll_prepare(id).await?;
        }

        let ready_ids = self.state.lock().ids_in_stage(TransferStage::Ready);
        for id in ready_ids {
            self.send_commit(id).await?;
        }

        let commit_ids = self.state.lock().ids_in_stage(TransferStage::Commit);
        for id in commit_ids {
            self.poll_commit_timeout(id).await?;
        }

        Ok(())
    }

    async fn send_prepare(&self, id: TransferId) -> Result<(), ProtocolError> {
        let Some((receiver, entity_ids)) = self
            .state
            .lock()
            .get(id)
            .map(|r| (r.receiver, r.entity_ids.clone()))
        else {
            return Ok(());
        };

        let packet = Packet::EntityTransfer(EntityTransferPacket {
            transfer_id: id,
            data: TransferStageData::Prepare(entity_ids),
        });
        self.sender.send(receiver, packet, SendFlag::ReliableNow).await.ok();

        let mut state = self.state.lock();
        state.set_stage(id, TransferStage::Prepare);
        if let Some(record) = state.get_mut(id) {
            record.waiting_on_response = true;
            record.prepare_attempts = 1;
            record.stage_entered_at = Some(Instant::now());
        }
        Ok(())
    }

    async fn poll_prepare(&self, id: TransferId) -> Result<(), ProtocolError> {
        let resend = {
            let mut state = self.state.lock();
            let Some(record) = state.get_mut(id) else {
                return Ok(());
            };
            let elapsed = record.stage_entered_at.map(|t| t.elapsed()).unwrap_or_default();
            if elapsed < self.config.prepare_timeout {
                None
            } else if record.prepare_attempts >= self.config.max_prepare_retries {
                Some(None)
            } else {
                record.prepare_attempts += 1;
                record.stage_entered_at = Some(Instant::now());
                Some(Some((record.receiver, record.entity_ids.clone())))
            }
        };

        match resend {
            None => Ok(()),
            Some(None) => {
                warn!(transfer_id = %id, "Prepare exceeded max retries, aborting transfer");
                self.abort(id).await?;
                Ok(())
            }
            Some(Some((receiver, entity_ids))) => {
                debug!(transfer_id = %id, "resending Prepare");
                let packet = Packet::EntityTransfer(EntityTransferPacket {
                    transfer_id: id,
                    data: TransferStageData::Prepare(entity_ids),
                });
                self.sender.send(receiver, packet, SendFlag::ReliableNow).await.ok();
                Ok(())
            }
        }
    }

    async fn send_commit(&self, id: TransferId) -> Result<(), ProtocolError> {
        let Some((receiver, entity_ids)) = self
            .state
            .lock()
            .get(id)
            .map(|r| (r.receiver, r.entity_ids.clone()))
        else {
            return Ok(());
        };

        let snapshots: Vec<(AtlasEntity, u64)> = entity_ids
            .iter()
            .filter_map(|entity_id| {
                let mut entity = self.ledger.get_and_erase(entity_id)?;
                entity.generation += 1;
                let generation = entity.generation;
                Some((entity, generation))
            })
            .collect();

        let packet = Packet::EntityTransfer(EntityTransferPacket {
            transfer_id: id,
            data: TransferStageData::Commit(snapshots),
        });
        self.sender.send(receiver, packet, SendFlag::ReliableNow).await.ok();

        let current_tick = self.tick.current();
        let mut state = self.state.lock();
        state.set_stage(id, TransferStage::Commit);
        if let Some(record) = state.get_mut(id) {
            record.local_commit_tick = current_tick;
            record.stage_entered_at = Some(Instant::now());
        }
        drop(state);
        if let Some(record) = self.state.lock().get(id).cloned() {
            self.publish_transfer_json(&record).await?;
        }
        Ok(())
    }

    async fn poll_commit_timeout(&self, id: TransferId) -> Result<(), ProtocolError> {
        let expired = self
            .state
            .lock()
            .get(id)
            .and_then(|r| r.stage_entered_at)
            .map(|t| t.elapsed() >= self.config.commit_timeout)
            .unwrap_or(false);

        if expired {
            warn!(transfer_id = %id, "Complete never arrived, dropping record (entities already committed away)");
            self.remove_and_forget(id).await?;
        }
        Ok(())
    }

    async fn abort(&self, id: TransferId) -> Result<(), ProtocolError> {
        self.remove_and_forget(id).await
    }

    async fn remove_and_forget(&self, id: TransferId) -> Result<(), ProtocolError> {
        self.state.lock().remove(id);
        self.store
            .json_del(TRANSFER_MANIFEST_KEY, &format!(".EntityTransfers.{id}"))
            .await?;
        Ok(())
    }

    // -------------------------------------------------------------------
    // 4.5.3 receiver side
    // -------------------------------------------------------------------

    /// Receiver-side `Prepare` handler: acceptance is optimistic, no state
    /// recorded, immediate `Ready` ack.
    pub async fn handle_prepare(&self, from: NetworkIdentity, transfer_id: TransferId) -> Result<(), ProtocolError> {
        let packet = Packet::EntityTransfer(EntityTransferPacket {
            transfer_id,
            data: TransferStageData::Ready,
        });
        self.sender.send(from, packet, SendFlag::ReliableNow).await.ok();
        Ok(())
    }

    /// Sender-side `Ready` handler: advances a matching `Prepare`-stage
    /// record to `Ready`.
    pub fn handle_ready(&self, from: NetworkIdentity, transfer_id: TransferId) -> Result<(), ProtocolError> {
        let mut state = self.state.lock();
        let matches = state
            .get(transfer_id)
            .map(|r| r.receiver == from && r.stage == TransferStage::Prepare)
            .unwrap_or(false);
        if !matches {
            return Err(ProtocolError::UnexpectedReady(transfer_id));
        }
        state.set_stage(transfer_id, TransferStage::Ready);
        if let Some(record) = state.get_mut(transfer_id) {
            record.waiting_on_response = false;
            record.stage_entered_at = Some(Instant::now());
        }
        Ok(())
    }

    /// Receiver-side `Commit` handler: stashes each snapshot for
    /// tick-deferred adoption and always replies `Complete`.
    pub async fn handle_commit(
        &self,
        from: NetworkIdentity,
        transfer_id: TransferId,
        snapshots: Vec<(AtlasEntity, u64)>,
    ) -> Result<(), ProtocolError> {
        let transfer_tick = self.tick.current() + self.config.handoff_lead_ticks;
        {
            let mut pending = self.pending_incoming.lock();
            for (entity, _generation) in snapshots {
                pending.insert(
                    entity.entity_id,
                    PendingIncomingHandoff {
                        entity,
                        sender: from,
                        transfer_tick,
                    },
                );
            }
        }

        let packet = Packet::EntityTransfer(EntityTransferPacket {
            transfer_id,
            data: TransferStageData::Complete,
        });
        self.sender.send(from, packet, SendFlag::ReliableNow).await.ok();
        Ok(())
    }

    /// Sender-side `Complete` handler: terminal, removes bookkeeping.
    /// Idempotent — a duplicate delivery finds nothing to remove and is
    /// logged, not treated as fatal (`spec.md` §4.5.4).
    pub async fn handle_complete(&self, transfer_id: TransferId) -> Result<(), ProtocolError> {
        let removed = self.state.lock().remove(transfer_id).is_some();
        if !removed {
            debug!(%transfer_id, "Complete for already-removed transfer, ignoring");
            return Ok(());
        }
        self.store
            .json_del(TRANSFER_MANIFEST_KEY, &format!(".EntityTransfers.{transfer_id}"))
            .await?;
        Ok(())
    }

    /// Tick-deferred adoption (§4.5.3): promotes every pending incoming
    /// handoff whose `transfer_tick` has arrived.
    pub fn adopt_ready(&self) {
        let current_tick = self.tick.current();
        let ready: Vec<AtlasEntityId> = {
            let pending = self.pending_incoming.lock();
            pending
                .iter()
                .filter(|(_, h)| h.transfer_tick <= current_tick)
                .map(|(id, _)| *id)
                .collect()
        };

        for entity_id in ready {
            let handoff = self.pending_incoming.lock().remove(&entity_id);
            if let Some(handoff) = handoff {
                self.ledger.upsert(handoff.entity);
                debug!(%entity_id, sender = %handoff.sender, "adopted incoming entity");
            }
        }
    }

    async fn publish_transfer_json(&self, record: &EntityTransferRecord) -> Result<(), ProtocolError> {
        let doc = json!({
            "From": {
                "display": self.self_identity.to_string(),
                "bytes": b64(self.self_identity.claim_key().as_bytes()),
            },
            "To": {
                "display": record.receiver.to_string(),
                "bytes": b64(record.receiver.claim_key().as_bytes()),
            },
            "Stage": format!("{:?}", record.stage),
            "EntityIDs": record.entity_ids.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
        });
        self.store
            .json_set(TRANSFER_MANIFEST_KEY, &format!(".EntityTransfers.{}", record.id), &doc, false)
            .await?;
        Ok(())
    }

    /// Main per-tick driver: drains newly out-of-bound entity ids, opens
    /// transfer records, advances the sender state machine, then adopts
    /// anything whose deferred tick has arrived.
    pub async fn run(
        self: Arc<Self>,
        mut to_parse_rx: mpsc::Receiver<AtlasEntityId>,
        period: Duration,
        stop: CancellationToken,
    ) {
        loop {
            if stop.is_cancelled() {
                return;
            }

            let mut drained = Vec::new();
            while let Ok(id) = to_parse_rx.try_recv() {
                drained.push(id);
            }
            if !drained.is_empty() {
                if let Err(e) = self.parse_entities_for_targets(drained).await {
                    warn!(error = %e, "parse_entities_for_targets failed this tick");
                }
            }

            if let Err(e) = self.transfer_tick().await {
                warn!(error = %e, "transfer_tick failed this tick");
            }
            self.adopt_ready();

            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = stop.cancelled() => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_core::bound::GridBound;
    use atlas_core::identity::Role;
    use atlas_core::types::Transform;
    use atlas_manifest::MemoryManifestStore;
    use glam::Vec3;
    use tokio::sync::Mutex as AsyncMutex;

    #[derive(Default)]
    struct RecordingSender {
        sent: AsyncMutex<Vec<(NetworkIdentity, Packet)>>,
    }

    #[async_trait::async_trait]
    impl PacketSender for RecordingSender {
        async fn send(&self, peer: NetworkIdentity, packet: Packet, _flag: SendFlag) -> anyhow::Result<()> {
            self.sent.lock().await.push((peer, packet));
            Ok(())
        }
    }

    fn bound_coordinator() -> (
        Arc<TransferCoordinator<GridBound>>,
        Arc<EntityLedger>,
        Arc<RecordingSender>,
    ) {
        let ledger = Arc::new(EntityLedger::new());
        let store = Arc::new(MemoryManifestStore::new());
        let heuristic = Arc::new(HeuristicManifest::<GridBound>::new(store.clone()));
        let sender = Arc::new(RecordingSender::default());
        let coordinator = Arc::new(TransferCoordinator::new(
            ledger.clone(),
            heuristic,
            store,
            sender.clone(),
            NetworkIdentity::generate(Role::Shard),
            Arc::new(TickSource::new()),
            TransferConfig::default(),
        ));
        (coordinator, ledger, sender)
    }

    fn entity_at(pos: Vec3) -> AtlasEntity {
        AtlasEntity::new(
            Transform {
                world: 0,
                position: pos,
                bounding_box: Vec3::ONE,
            },
            vec![],
        )
    }

    #[tokio::test]
    async fn parse_drops_id_already_in_transfer() {
        let (coordinator, ledger, _sender) = bound_coordinator();
        let e = entity_at(Vec3::ZERO);
        let id = e.entity_id;
        ledger.register_new(e).unwrap();

        let receiver = NetworkIdentity::generate(Role::Shard);
        let record = EntityTransferRecord::new(receiver, vec![id]);
        coordinator.state.lock().insert(record);

        coordinator.parse_entities_for_targets(vec![id]).await.unwrap();
        assert_eq!(coordinator.outstanding_count(), 1);
    }

    #[tokio::test]
    async fn parse_drops_client_entities() {
        let (coordinator, ledger, _sender) = bound_coordinator();
        let mut e = entity_at(Vec3::ZERO);
        e.is_client = true;
        let id = e.entity_id;
        ledger.register_new(e).unwrap();

        coordinator.parse_entities_for_targets(vec![id]).await.unwrap();
        assert_eq!(coordinator.outstanding_count(), 0);
    }

    #[tokio::test]
    async fn prepare_retries_then_aborts() {
        let (coordinator, ledger, sender) = bound_coordinator();
        let e = entity_at(Vec3::ZERO);
        let id = e.entity_id;
        ledger.register_new(e).unwrap();

        let receiver = NetworkIdentity::generate(Role::Shard);
        let mut record = EntityTransferRecord::new(receiver, vec![id]);
        record.stage = TransferStage::Prepare;
        record.prepare_attempts = 1;
        record.stage_entered_at = Some(Instant::now() - Duration::from_secs(10));
        let transfer_id = record.id;
        coordinator.state.lock().insert(record);

        for _ in 0..5 {
            coordinator.transfer_tick().await.unwrap();
            if let Some(r) = coordinator.state.lock().get_mut(transfer_id) {
                r.stage_entered_at = Some(Instant::now() - Duration::from_secs(10));
            } else {
                break;
            }
        }

        assert!(coordinator.state.lock().get(transfer_id).is_none());
        assert!(sender.sent.lock().await.len() >= 2);
    }

    #[tokio::test]
    async fn duplicate_complete_is_not_fatal() {
        let (coordinator, _ledger, _sender) = bound_coordinator();
        let receiver = NetworkIdentity::generate(Role::Shard);
        let record = EntityTransferRecord::new(receiver, vec![AtlasEntityId::new()]);
        let transfer_id = record.id;
        coordinator.state.lock().insert(record);

        coordinator.handle_complete(transfer_id).await.unwrap();
        coordinator.handle_complete(transfer_id).await.unwrap();
        assert!(coordinator.state.lock().get(transfer_id).is_none());
    }

    #[tokio::test]
    async fn adoption_waits_for_deferred_tick() {
        let (coordinator, ledger, _sender) = bound_coordinator();
        let from = NetworkIdentity::generate(Role::Shard);
        let entity = entity_at(Vec3::new(5.0, 5.0, 5.0));
        let entity_id = entity.entity_id;

        coordinator
            .handle_commit(from, TransferId::new(), vec![(entity, 1)])
            .await
            .unwrap();

        coordinator.adopt_ready();
        assert!(ledger.get(&entity_id).is_none());

        for _ in 0..10 {
            coordinator.tick.advance();
        }
        coordinator.adopt_ready();
        assert!(ledger.get(&entity_id).is_some());
    }
}
