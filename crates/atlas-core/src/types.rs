//! Entity, transfer, and handoff bookkeeping types shared across crates.

use glam::Vec3;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::NetworkIdentity;

// =============================================================================
// ENTITY
// =============================================================================

/// Globally unique entity id. Retained through any number of handoffs.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct AtlasEntityId(pub Uuid);

impl AtlasEntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AtlasEntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AtlasEntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// World-space transform carried by every entity.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Transform {
    pub world: u32,
    pub position: Vec3,
    pub bounding_box: Vec3,
}

/// Ownership-indivisible unit of simulation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AtlasEntity {
    pub entity_id: AtlasEntityId,
    pub is_client: bool,
    /// Zero (nil) UUID when `is_client` is false.
    pub client_id: Uuid,
    pub transform: Transform,
    /// Opaque payload preserved bit-exact across transfer.
    pub metadata: Vec<u8>,
    /// Bumped on every Commit snapshot; lets a receiver distinguish a fresh
    /// adoption from a stale re-delivery after a shard restart.
    pub generation: u64,
}

impl AtlasEntity {
    pub fn new(transform: Transform, metadata: Vec<u8>) -> Self {
        Self {
            entity_id: AtlasEntityId::new(),
            is_client: false,
            client_id: Uuid::nil(),
            transform,
            metadata,
            generation: 0,
        }
    }
}

/// Minimal projection of an entity, used by `LocalEntityListRequestPacket`
/// replies when the requester only needs identity + position.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AtlasEntityMinimal {
    pub entity_id: AtlasEntityId,
    pub is_client: bool,
    pub client_id: Uuid,
    pub position: Vec3,
}

impl From<&AtlasEntity> for AtlasEntityMinimal {
    fn from(e: &AtlasEntity) -> Self {
        Self {
            entity_id: e.entity_id,
            is_client: e.is_client,
            client_id: e.client_id,
            position: e.transform.position,
        }
    }
}

// =============================================================================
// TRANSFER
// =============================================================================

/// UUID minted by the sender at transfer start.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TransferId(pub Uuid);

impl TransferId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sender-side handoff stage. `transfer_tick` uses `None` to mean "not yet
/// negotiated", matching the source's `{None, Prepare, Ready, Commit,
/// Complete}` enumeration.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TransferStage {
    None,
    Prepare,
    Ready,
    Commit,
    Complete,
}

/// Per-outstanding-transfer bookkeeping, held by the sender.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EntityTransferRecord {
    pub id: TransferId,
    pub receiver: NetworkIdentity,
    pub entity_ids: Vec<AtlasEntityId>,
    pub stage: TransferStage,
    pub waiting_on_response: bool,
    pub local_commit_tick: u64,
    /// Retry/backoff bookkeeping for the Prepare stage (not in the wire
    /// record; local to the sender).
    #[serde(skip)]
    pub prepare_attempts: u32,
    #[serde(skip)]
    pub stage_entered_at: Option<std::time::Instant>,
}

impl EntityTransferRecord {
    pub fn new(receiver: NetworkIdentity, entity_ids: Vec<AtlasEntityId>) -> Self {
        Self {
            id: TransferId::new(),
            receiver,
            entity_ids,
            stage: TransferStage::None,
            waiting_on_response: false,
            local_commit_tick: 0,
            prepare_attempts: 0,
            stage_entered_at: None,
        }
    }
}

/// Receiver-side bookkeeping, keyed by `entity_id`, created on `Commit`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PendingIncomingHandoff {
    pub entity: AtlasEntity,
    pub sender: NetworkIdentity,
    pub transfer_tick: u64,
}

/// Sender-side bookkeeping, keyed by `entity_id`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PendingOutgoingHandoff {
    pub entity_id: AtlasEntityId,
    pub target: NetworkIdentity,
    pub target_claim_key: String,
    pub transfer_tick: u64,
}

// =============================================================================
// CONNECTION LEASE
// =============================================================================

/// Symmetric lease key: `"<prefix>|<idA>|<idB>"` with `idA < idB`
/// lexicographically on the stringified identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionLease {
    pub lease_key: String,
    pub owner: NetworkIdentity,
}

pub fn lease_key(prefix: &str, a: &NetworkIdentity, b: &NetworkIdentity) -> String {
    let (a, b) = (a.claim_key(), b.claim_key());
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    format!("{prefix}|{lo}|{hi}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Role;

    #[test]
    fn lease_key_is_symmetric() {
        let a = NetworkIdentity::generate(Role::Shard);
        let b = NetworkIdentity::generate(Role::Shard);
        assert_eq!(lease_key("handoff", &a, &b), lease_key("handoff", &b, &a));
    }

    #[test]
    fn minimal_projection_preserves_identity() {
        let t = Transform {
            world: 0,
            position: Vec3::new(1.0, 2.0, 3.0),
            bounding_box: Vec3::ONE,
        };
        let e = AtlasEntity::new(t, vec![0xDE, 0xAD]);
        let min = AtlasEntityMinimal::from(&e);
        assert_eq!(min.entity_id, e.entity_id);
        assert_eq!(min.position, t.position);
    }
}
