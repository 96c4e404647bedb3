//! Errors raised by the registry/routing CRUD layer.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("manifest store error: {0}")]
    Store(#[from] atlas_manifest::StoreError),

    #[error("malformed network identity in registry: {0}")]
    MalformedIdentity(#[from] atlas_core::CoreError),

    #[error("malformed address for {0}: {1}")]
    MalformedAddress(atlas_core::NetworkIdentity, String),

    #[error("json document error: {0}")]
    Json(#[from] serde_json::Error),
}
