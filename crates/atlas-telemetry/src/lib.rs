//! Periodic publication of per-connection link stats and the current
//! entity→owner table into the manifest store (C10, `spec.md` §4.7).

pub mod error;
pub mod publisher;

pub use error::{Result, TelemetryError};
pub use publisher::{TelemetryPublisher, ENTITY_AUTHORITY_KEY, NETWORK_TELEMETRY_KEY};
