//! `atlas-transfer`: the entity handoff protocol (C8, `spec.md` §4.5).

pub mod coordinator;
pub mod error;
pub mod sender;
pub mod state;

pub use coordinator::{TransferCoordinator, TransferConfig};
pub use error::ProtocolError;
pub use sender::PacketSender;
pub use state::TransferState;

pub type Result<T> = std::result::Result<T, ProtocolError>;
