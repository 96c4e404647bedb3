//! Errors raised while starting or tearing down a [`crate::ShardRuntime`].

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("manifest store error: {0}")]
    Store(#[from] atlas_manifest::StoreError),

    #[error("transport error: {0}")]
    Transport(#[from] atlas_net::transport::TransportError),

    #[error("registry error: {0}")]
    Registry(#[from] atlas_registry::RegistryError),

    #[error("heuristic error: {0}")]
    Heuristic(#[from] atlas_heuristic::HeuristicError),

    #[error("handoff error: {0}")]
    Handoff(#[from] atlas_handoff::HandoffError),
}
