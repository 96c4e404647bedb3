//! `BoundLeaser` (C6): one background task per shard that atomically
//! claims a bound and establishes this shard's authority region
//! (`spec.md` §4.3).

use std::sync::Arc;
use std::time::Duration;

use atlas_core::{Bound, NetworkIdentity};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::manifest::HeuristicManifest;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Per-shard claim-or-retry loop. A single shard holds at most one bound
/// at a time in this design (re-leasing multiple bounds is not specified
/// — `spec.md` §4.3).
pub struct BoundLeaser<B> {
    manifest: Arc<HeuristicManifest<B>>,
    self_identity: NetworkIdentity,
    poll_interval: Duration,
    held: RwLock<Option<B>>,
}

impl<B> BoundLeaser<B>
where
    B: Bound + Serialize + DeserializeOwned + Clone + 'static,
{
    pub fn new(manifest: Arc<HeuristicManifest<B>>, self_identity: NetworkIdentity) -> Self {
        Self {
            manifest,
            self_identity,
            poll_interval: DEFAULT_POLL_INTERVAL,
            held: RwLock::new(None),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn has_bound(&self) -> bool {
        self.held.read().is_some()
    }

    pub fn get_bound(&self) -> Option<B> {
        self.held.read().clone()
    }

    /// Clears the locally-held bound without touching the manifest store.
    /// Called after the store-side release so the leaser resumes
    /// claim-or-retry on its next tick instead of believing it still
    /// holds a bound it just gave back.
    pub fn forget(&self) {
        *self.held.write() = None;
    }

    /// Runs until `stop` is cancelled. On each iteration: if no bound is
    /// held, try to claim one; verify the claim actually landed under
    /// this shard's identity (a mismatch means the store lost atomicity
    /// — log and keep trying); otherwise sleep.
    pub async fn run(self: Arc<Self>, stop: CancellationToken) {
        loop {
            if stop.is_cancelled() {
                return;
            }
            if !self.has_bound() {
                match self.manifest.claim_next_pending(&self.self_identity.claim_key()).await {
                    Ok(Some(bound)) => {
                        let claimer = self.manifest.claimer_from_bound(bound.id()).await;
                        match claimer {
                            Ok(Some(identity)) if identity == self.self_identity => {
                                info!(bound_id = ?bound.id(), "claimed bound");
                                *self.held.write() = Some(bound);
                            }
                            Ok(other) => {
                                warn!(
                                    bound_id = ?bound.id(),
                                    claimer = ?other,
                                    "post-claim verification mismatch, store lost atomicity, dropping local copy"
                                );
                            }
                            Err(e) => {
                                warn!(error = %e, "could not verify claim, dropping local copy");
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(error = %e, "bound claim attempt failed");
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = stop.cancelled() => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_core::bound::GridBound;
    use atlas_core::identity::Role;
    use atlas_core::BoundsId;
    use atlas_manifest::MemoryManifestStore;
    use glam::Vec3;

    #[tokio::test]
    async fn claims_a_bound_and_stops_retrying() {
        let store = Arc::new(MemoryManifestStore::new());
        let manifest = Arc::new(HeuristicManifest::<GridBound>::new(store));
        manifest
            .seed_pending(&[GridBound::new(BoundsId(1), Vec3::ZERO, Vec3::splat(10.0))])
            .await
            .unwrap();

        let identity = NetworkIdentity::generate(Role::Shard);
        let leaser = Arc::new(BoundLeaser::new(manifest, identity));
        let stop = CancellationToken::new();
        let task_stop = stop.clone();
        let leaser_clone = Arc::clone(&leaser);
        let handle = tokio::spawn(async move { leaser_clone.run(task_stop).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(leaser.has_bound());
        assert_eq!(leaser.get_bound().unwrap().id(), BoundsId(1));

        stop.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn four_shards_two_bounds_exactly_two_win() {
        let store = Arc::new(MemoryManifestStore::new());
        let manifest = Arc::new(HeuristicManifest::<GridBound>::new(store));
        manifest
            .seed_pending(&[
                GridBound::new(BoundsId(1), Vec3::ZERO, Vec3::splat(10.0)),
                GridBound::new(BoundsId(2), Vec3::new(10.0, 0.0, 0.0), Vec3::new(20.0, 10.0, 10.0)),
            ])
            .await
            .unwrap();

        let mut leasers = Vec::new();
        let mut stops = Vec::new();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let identity = NetworkIdentity::generate(Role::Shard);
            let leaser = BoundLeaser::new(Arc::clone(&manifest), identity).with_poll_interval(Duration::from_millis(5));
            let leaser = Arc::new(leaser);
            let stop = CancellationToken::new();
            let (lc, sc) = (Arc::clone(&leaser), stop.clone());
            handles.push(tokio::spawn(async move { lc.run(sc).await }));
            leasers.push(leaser);
            stops.push(stop);
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        let winners = leasers.iter().filter(|l| l.has_bound()).count();
        assert_eq!(winners, 2);

        for stop in stops {
            stop.cancel();
        }
        for h in handles {
            h.await.unwrap();
        }
    }
}
