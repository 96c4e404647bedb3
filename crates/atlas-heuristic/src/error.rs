//! Errors raised by the heuristic manifest and bound leaser.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HeuristicError>;

#[derive(Debug, Error)]
pub enum HeuristicError {
    #[error("manifest store error: {0}")]
    Store(#[from] atlas_manifest::StoreError),

    #[error("could not decode shape blob: {0}")]
    Decode(#[from] postcard::Error),

    #[error("could not parse claimer key as a network identity: {0}")]
    MalformedClaimer(#[from] atlas_core::CoreError),
}
