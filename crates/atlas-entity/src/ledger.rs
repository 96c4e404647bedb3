//! `EntityLedger` (C7): the in-memory authoritative set of entities this
//! shard owns (`spec.md` §4.4).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use atlas_core::{AtlasEntity, AtlasEntityId, AtlasEntityMinimal, InvariantViolation};
use glam::Vec3;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Reply payload for `LocalEntityListRequestPacket`: full entities or the
/// minimal projection, selected by a flag on the request.
#[derive(Clone, Debug)]
pub enum EntityListSnapshot {
    Full(Vec<AtlasEntity>),
    Minimal(Vec<AtlasEntityMinimal>),
}

/// Mutex-protected `AtlasEntityId -> AtlasEntity` map. Single-process
/// local; only this shard mutates it (`spec.md` §5).
#[derive(Default)]
pub struct EntityLedger {
    entities: Mutex<HashMap<AtlasEntityId, AtlasEntity>>,
}

impl EntityLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a brand-new entity. Registering an id that is already
    /// present is a programmer error (`InvariantViolation::DuplicateEntityRegistration`,
    /// `spec.md` §7): this is fatal, not recoverable, so the caller should
    /// treat `Err` as grounds to abort the process.
    pub fn register_new(&self, entity: AtlasEntity) -> Result<(), InvariantViolation> {
        let mut entities = self.entities.lock();
        if entities.contains_key(&entity.entity_id) {
            return Err(InvariantViolation::DuplicateEntityRegistration(entity.entity_id));
        }
        entities.insert(entity.entity_id, entity);
        Ok(())
    }

    /// Re-adopts a snapshot, overwriting any existing entry. Used when a
    /// formerly-owned id returns via `Commit` adoption (`spec.md` §4.5.3).
    pub fn upsert(&self, entity: AtlasEntity) {
        self.entities.lock().insert(entity.entity_id, entity);
    }

    pub fn erase(&self, id: &AtlasEntityId) -> Option<AtlasEntity> {
        self.entities.lock().remove(id)
    }

    pub fn get(&self, id: &AtlasEntityId) -> Option<AtlasEntity> {
        self.entities.lock().get(id).cloned()
    }

    /// Atomically reads and removes an entity in one lock acquisition —
    /// the operation the sender's Commit stage uses to erase entities the
    /// instant it stops being authoritative (`spec.md` §4.5.2).
    pub fn get_and_erase(&self, id: &AtlasEntityId) -> Option<AtlasEntity> {
        self.entities.lock().remove(id)
    }

    pub fn is_client(&self, id: &AtlasEntityId) -> Option<bool> {
        self.entities.lock().get(id).map(|e| e.is_client)
    }

    pub fn for_each(&self, mut f: impl FnMut(&AtlasEntity)) {
        for entity in self.entities.lock().values() {
            f(entity);
        }
    }

    pub fn len(&self) -> usize {
        self.entities.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot_full(&self) -> Vec<AtlasEntity> {
        self.entities.lock().values().cloned().collect()
    }

    pub fn snapshot_minimal(&self) -> Vec<AtlasEntityMinimal> {
        self.entities.lock().values().map(AtlasEntityMinimal::from).collect()
    }

    pub fn snapshot_for_request(&self, full: bool) -> EntityListSnapshot {
        if full {
            EntityListSnapshot::Full(self.snapshot_full())
        } else {
            EntityListSnapshot::Minimal(self.snapshot_minimal())
        }
    }

    /// Builds the reply packet for a [`LocalEntityListRequestPacket`]
    /// (`spec.md` §4.4): snapshots the requested projection and wraps it
    /// with the request's id so the sender can correlate the reply.
    pub fn build_list_reply(
        &self,
        request_id: uuid::Uuid,
        full: bool,
    ) -> atlas_net::packet::LocalEntityListReplyPacket {
        use atlas_net::packet::LocalEntityListReplyData;
        let data = match self.snapshot_for_request(full) {
            EntityListSnapshot::Full(entities) => LocalEntityListReplyData::Full(entities),
            EntityListSnapshot::Minimal(entities) => LocalEntityListReplyData::Minimal(entities),
        };
        atlas_net::packet::LocalEntityListReplyPacket { request_id, data }
    }

    /// Background scan loop (`spec.md` §4.4, period ~50ms by default):
    /// copies out-of-bound entity ids under the lock, releases it, then
    /// feeds them to `out_tx`. `bound_test` returns `None` when this shard
    /// holds no bound yet (nothing to compare against) and `Some(contains)`
    /// otherwise; `in_transfer_test` is the `EntitiesInTransfer` membership
    /// check owned by the transfer coordinator. No network or store I/O
    /// happens while the ledger lock is held.
    pub async fn run_scan_loop(
        self: Arc<Self>,
        bound_test: impl Fn(Vec3) -> Option<bool> + Send + Sync + 'static,
        in_transfer_test: impl Fn(&AtlasEntityId) -> bool + Send + Sync + 'static,
        out_tx: mpsc::Sender<AtlasEntityId>,
        period: Duration,
        stop: CancellationToken,
    ) {
        loop {
            if stop.is_cancelled() {
                return;
            }

            let out_of_bound: Vec<AtlasEntityId> = {
                let entities = self.entities.lock();
                entities
                    .values()
                    .filter(|e| !in_transfer_test(&e.entity_id))
                    .filter_map(|e| match bound_test(e.transform.position) {
                        Some(false) => Some(e.entity_id),
                        _ => None,
                    })
                    .collect()
            };

            for id in out_of_bound {
                if out_tx.send(id).await.is_err() {
                    error!("entity ledger scan: transfer coordinator queue closed, stopping scan loop");
                    return;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = stop.cancelled() => return,
            }
        }
    }
}
