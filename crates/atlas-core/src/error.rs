//! Shared error types for the runtime core.

use thiserror::Error;

/// Result alias using [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by core types (identity parsing, bound geometry).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("malformed network identity: {0}")]
    MalformedIdentity(String),

    #[error("unknown role tag: {0}")]
    UnknownRole(String),
}

/// A fatal, programmer-error class condition. Logged then the process exits
/// non-zero; never caught and continued.
#[derive(Debug, Error)]
pub enum InvariantViolation {
    #[error("entity {0} registered twice in the same ledger")]
    DuplicateEntityRegistration(crate::types::AtlasEntityId),

    #[error("bound {0:?} claimed twice")]
    DuplicateBoundClaim(crate::types::BoundsId),

    #[error("entity {0} present in ledger after being committed away")]
    EntityNotErasedAtCommit(crate::types::AtlasEntityId),
}
