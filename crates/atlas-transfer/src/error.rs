//! Errors raised while driving the handoff protocol. Per `spec.md` §7
//! these are logged and dropped by the packet dispatcher, never
//! propagated into a crash — a restarted peer mid-flight is an expected
//! condition, not a bug.

use atlas_core::TransferId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Ready arrived for unknown or already-advanced transfer {0}")]
    UnexpectedReady(TransferId),

    #[error("Complete arrived for unknown transfer {0}")]
    UnknownTransferId(TransferId),

    #[error("manifest store error: {0}")]
    Store(#[from] atlas_manifest::StoreError),

    #[error("heuristic manifest error: {0}")]
    Heuristic(#[from] atlas_heuristic::HeuristicError),
}
