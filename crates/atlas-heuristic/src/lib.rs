//! `HeuristicManifest` (C5) and `BoundLeaser` (C6): bound publication,
//! atomic claiming, and the per-shard leasing loop.

pub mod error;
pub mod leaser;
pub mod manifest;

pub use error::{HeuristicError, Result};
pub use leaser::BoundLeaser;
pub use manifest::HeuristicManifest;
