//! Errors raised by the handoff connection manager.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HandoffError>;

#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("manifest store error: {0}")]
    Store(#[from] atlas_manifest::StoreError),

    #[error("transport error: {0}")]
    Transport(#[from] atlas_net::transport::TransportError),

    #[error("registry error: {0}")]
    Registry(#[from] atlas_registry::RegistryError),
}
