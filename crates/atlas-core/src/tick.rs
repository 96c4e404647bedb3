//! Shared simulation tick counter.
//!
//! The handoff protocol reasons about ticks (`transfer_tick`,
//! `local_commit_tick`) rather than wall-clock time so both sides of a
//! transfer have a deterministic, monotonic shared reference point.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A monotonically increasing tick counter, shared (via `Arc`) by every
/// subsystem on a shard that needs to read or advance "now" in ticks.
#[derive(Clone, Debug, Default)]
pub struct TickSource {
    inner: Arc<AtomicU64>,
}

impl TickSource {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn current(&self) -> u64 {
        self.inner.load(Ordering::SeqCst)
    }

    /// Advance by one tick, returning the new value.
    pub fn advance(&self) -> u64 {
        self.inner.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_monotonically() {
        let t = TickSource::new();
        assert_eq!(t.current(), 0);
        assert_eq!(t.advance(), 1);
        assert_eq!(t.advance(), 2);
        assert_eq!(t.current(), 2);
    }

    #[test]
    fn shared_handle_sees_advances() {
        let t = TickSource::new();
        let t2 = t.clone();
        t.advance();
        assert_eq!(t2.current(), 1);
    }
}
