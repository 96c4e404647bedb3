//! Indexed in-memory storage for outstanding transfers: a primary map by
//! `TransferId` plus secondary non-unique indexes by stage and receiver
//! (`spec.md` §4.5: "iteration by stage must be efficient").

use std::collections::{HashMap, HashSet};

use atlas_core::{AtlasEntityId, EntityTransferRecord, NetworkIdentity, TransferId, TransferStage};

#[derive(Default)]
pub struct TransferState {
    by_id: HashMap<TransferId, EntityTransferRecord>,
    by_stage: HashMap<TransferStage, HashSet<TransferId>>,
    by_receiver: HashMap<NetworkIdentity, HashSet<TransferId>>,
    pub entities_in_transfer: HashMap<AtlasEntityId, TransferId>,
}

impl TransferState {
    pub fn insert(&mut self, record: EntityTransferRecord) {
        self.by_stage.entry(record.stage).or_default().insert(record.id);
        self.by_receiver.entry(record.receiver).or_default().insert(record.id);
        for entity_id in &record.entity_ids {
            self.entities_in_transfer.insert(*entity_id, record.id);
        }
        self.by_id.insert(record.id, record);
    }

    pub fn get(&self, id: TransferId) -> Option<&EntityTransferRecord> {
        self.by_id.get(&id)
    }

    pub fn get_mut(&mut self, id: TransferId) -> Option<&mut EntityTransferRecord> {
        self.by_id.get_mut(&id)
    }

    /// Moves a record to a new stage, keeping the stage index consistent.
    pub fn set_stage(&mut self, id: TransferId, stage: TransferStage) {
        if let Some(record) = self.by_id.get_mut(&id) {
            let old = record.stage;
            record.stage = stage;
            if let Some(set) = self.by_stage.get_mut(&old) {
                set.remove(&id);
            }
            self.by_stage.entry(stage).or_default().insert(id);
        }
    }

    pub fn remove(&mut self, id: TransferId) -> Option<EntityTransferRecord> {
        let record = self.by_id.remove(&id)?;
        if let Some(set) = self.by_stage.get_mut(&record.stage) {
            set.remove(&id);
        }
        if let Some(set) = self.by_receiver.get_mut(&record.receiver) {
            set.remove(&id);
        }
        for entity_id in &record.entity_ids {
            self.entities_in_transfer.remove(entity_id);
        }
        Some(record)
    }

    pub fn ids_in_stage(&self, stage: TransferStage) -> Vec<TransferId> {
        self.by_stage.get(&stage).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
