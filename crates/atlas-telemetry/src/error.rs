//! Errors raised by the telemetry publisher.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TelemetryError>;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("manifest store error: {0}")]
    Store(#[from] atlas_manifest::StoreError),

    #[error("could not encode telemetry blob: {0}")]
    Encode(#[from] postcard::Error),
}
