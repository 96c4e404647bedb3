//! Core protocol types shared by every runtime crate: identity, spatial
//! bounds, entities, and transfer bookkeeping.

pub mod bound;
pub mod error;
pub mod identity;
pub mod tick;
pub mod types;

pub use bound::{Bound, BoundsId, GridBound};
pub use error::{CoreError, InvariantViolation, Result};
pub use identity::{NetworkIdentity, Role};
pub use tick::TickSource;
pub use types::{
    lease_key, AtlasEntity, AtlasEntityId, AtlasEntityMinimal, ConnectionLease,
    EntityTransferRecord, PendingIncomingHandoff, PendingOutgoingHandoff, TransferId,
    TransferStage, Transform,
};
