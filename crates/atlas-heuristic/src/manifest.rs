//! `HeuristicManifest` (C5): publishes pending bounds, tracks claimed
//! bounds, and answers point/bound/shard reverse lookups. Claim atomicity
//! here is the entire safety mechanism for invariant I1 (`spec.md` §4.2).

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use atlas_core::{Bound, BoundsId, NetworkIdentity};
use atlas_manifest::ManifestStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::Result;

const PENDING_KEY: &str = "Heuristic_Bounds_Pending";
const CLAIMED_KEY: &str = "Heuristic_Bounds_Claimed";
const ACTIVE_TYPE_KEY: &str = "Heuristic_Active_Type";

/// Publishes and claims bounds of shape `B`. Generic over the shape so a
/// deployment can swap `GridBound` for another `Bound` implementation
/// without touching this component — the core is agnostic to shape kind
/// (`spec.md` §3).
pub struct HeuristicManifest<B> {
    store: Arc<dyn ManifestStore>,
    _shape: PhantomData<B>,
}

impl<B> HeuristicManifest<B>
where
    B: Bound + Serialize + DeserializeOwned + Clone,
{
    pub fn new(store: Arc<dyn ManifestStore>) -> Self {
        Self {
            store,
            _shape: PhantomData,
        }
    }

    fn encode(bound: &B) -> Result<Vec<u8>> {
        Ok(postcard::to_allocvec(bound)?)
    }

    fn decode(blob: &[u8]) -> Result<B> {
        Ok(postcard::from_bytes(blob)?)
    }

    /// Idempotently inserts shape blobs into the pending set. Duplicates
    /// are no-ops (set semantics).
    pub async fn seed_pending(&self, bounds: &[B]) -> Result<()> {
        for bound in bounds {
            let blob = Self::encode(bound)?;
            self.store.sadd(PENDING_KEY, &blob).await?;
        }
        Ok(())
    }

    /// Atomic pop-one-and-record: pops a shape blob from the pending set
    /// and records the claim under `claimer_key` (the string form of a
    /// shard's `NetworkIdentity`). Returns `None` once pending is empty.
    pub async fn claim_next_pending(&self, claimer_key: &str) -> Result<Option<B>> {
        let Some(blob) = self.store.spop(PENDING_KEY).await? else {
            return Ok(None);
        };
        self.store.hset(CLAIMED_KEY, claimer_key, &blob).await?;
        Ok(Some(Self::decode(&blob)?))
    }

    /// Releases a held bound back to the pending set (`spec.md` §3's
    /// graceful-exit lifecycle transition). No-op, returning `None`, if
    /// `claimer_key` holds nothing.
    pub async fn release_bound(&self, claimer_key: &str) -> Result<Option<B>> {
        let Some(blob) = self.store.hget(CLAIMED_KEY, claimer_key).await? else {
            return Ok(None);
        };
        self.store.hdel(CLAIMED_KEY, claimer_key).await?;
        self.store.sadd(PENDING_KEY, &blob).await?;
        Ok(Some(Self::decode(&blob)?))
    }

    pub async fn bound_id_from_claimer(&self, claimer_key: &str) -> Result<Option<BoundsId>> {
        match self.store.hget(CLAIMED_KEY, claimer_key).await? {
            Some(blob) => Ok(Some(Self::decode(&blob)?.id())),
            None => Ok(None),
        }
    }

    /// Reverse lookup: which shard claims the bound with this id. Scans
    /// the claimed hash, since the store only indexes by claimer key in
    /// the forward direction.
    pub async fn claimer_from_bound(&self, bound_id: BoundsId) -> Result<Option<NetworkIdentity>> {
        let all = self.store.hgetall(CLAIMED_KEY).await?;
        for (claimer, blob) in all {
            match Self::decode(&blob) {
                Ok(bound) if bound.id() == bound_id => {
                    return Ok(claimer.parse().ok());
                }
                Ok(_) => continue,
                Err(e) => {
                    warn!(claimer, error = %e, "undecodable claimed-bound blob, skipping");
                }
            }
        }
        Ok(None)
    }

    /// Reverse lookup: which bound (if any) contains `point`. Used by the
    /// transfer coordinator's target resolution (`spec.md` §4.5.1 step 3).
    pub async fn query_position(&self, point: glam::Vec3) -> Result<Option<BoundsId>> {
        let all = self.get_all_claimed().await?;
        for bound in all.values() {
            if bound.contains(point) {
                return Ok(Some(bound.id()));
            }
        }
        Ok(None)
    }

    pub async fn get_all_pending(&self) -> Result<Vec<B>> {
        let blobs = self.store.smembers(PENDING_KEY).await?;
        blobs.iter().map(|b| Self::decode(b)).collect()
    }

    pub async fn get_all_claimed(&self) -> Result<HashMap<NetworkIdentity, B>> {
        let all = self.store.hgetall(CLAIMED_KEY).await?;
        let mut out = HashMap::with_capacity(all.len());
        for (claimer, blob) in all {
            let identity: NetworkIdentity = match claimer.parse() {
                Ok(id) => id,
                Err(_) => {
                    warn!(claimer, "claimed-bound hash field is not a valid network identity, skipping");
                    continue;
                }
            };
            out.insert(identity, Self::decode(&blob)?);
        }
        Ok(out)
    }

    /// Records which heuristic type is in effect. The runtime invariant
    /// that the pending set must be empty before switching is enforced by
    /// the caller (`apps/bootstrapper`), not by this component.
    pub async fn set_active_heuristic_type(&self, name: &str) -> Result<()> {
        self.store.set(ACTIVE_TYPE_KEY, name.as_bytes()).await?;
        Ok(())
    }

    pub async fn get_active_heuristic_type(&self) -> Result<Option<String>> {
        match self.store.get(ACTIVE_TYPE_KEY).await? {
            Some(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_core::bound::GridBound;
    use atlas_core::identity::Role;
    use atlas_manifest::MemoryManifestStore;
    use glam::Vec3;

    fn manifest() -> HeuristicManifest<GridBound> {
        HeuristicManifest::new(Arc::new(MemoryManifestStore::new()))
    }

    #[tokio::test]
    async fn seed_is_idempotent() {
        let m = manifest();
        let b = GridBound::new(BoundsId(1), Vec3::ZERO, Vec3::splat(10.0));
        m.seed_pending(&[b, b]).await.unwrap();
        assert_eq!(m.get_all_pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn claim_moves_pending_to_claimed() {
        let m = manifest();
        let b = GridBound::new(BoundsId(7), Vec3::ZERO, Vec3::splat(10.0));
        m.seed_pending(&[b]).await.unwrap();

        let claimer = NetworkIdentity::generate(Role::Shard);
        let claimed = m.claim_next_pending(&claimer.claim_key()).await.unwrap().unwrap();
        assert_eq!(claimed.id(), BoundsId(7));
        assert!(m.get_all_pending().await.unwrap().is_empty());
        assert_eq!(m.bound_id_from_claimer(&claimer.claim_key()).await.unwrap(), Some(BoundsId(7)));
        assert_eq!(m.claimer_from_bound(BoundsId(7)).await.unwrap(), Some(claimer));
    }

    #[tokio::test]
    async fn claim_on_empty_pending_returns_none() {
        let m = manifest();
        let claimer = NetworkIdentity::generate(Role::Shard);
        assert_eq!(m.claim_next_pending(&claimer.claim_key()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn two_shards_racing_claim_never_get_the_same_bound() {
        let m = Arc::new(manifest());
        let a = GridBound::new(BoundsId(1), Vec3::ZERO, Vec3::splat(10.0));
        let b = GridBound::new(BoundsId(2), Vec3::new(10.0, 0.0, 0.0), Vec3::new(20.0, 10.0, 10.0));
        m.seed_pending(&[a, b]).await.unwrap();

        let shards: Vec<NetworkIdentity> = (0..4).map(|_| NetworkIdentity::generate(Role::Shard)).collect();
        let mut claimed_ids = Vec::new();
        for shard in &shards {
            if let Some(bound) = m.claim_next_pending(&shard.claim_key()).await.unwrap() {
                claimed_ids.push(bound.id());
            }
        }
        claimed_ids.sort_by_key(|b| b.0);
        assert_eq!(claimed_ids, vec![BoundsId(1), BoundsId(2)]);
    }

    #[tokio::test]
    async fn release_returns_bound_to_pending() {
        let m = manifest();
        let b = GridBound::new(BoundsId(4), Vec3::ZERO, Vec3::splat(10.0));
        m.seed_pending(&[b]).await.unwrap();
        let claimer = NetworkIdentity::generate(Role::Shard);
        m.claim_next_pending(&claimer.claim_key()).await.unwrap();

        let released = m.release_bound(&claimer.claim_key()).await.unwrap().unwrap();
        assert_eq!(released.id(), BoundsId(4));
        assert!(m.bound_id_from_claimer(&claimer.claim_key()).await.unwrap().is_none());
        assert_eq!(m.get_all_pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn releasing_with_no_held_bound_is_a_noop() {
        let m = manifest();
        let claimer = NetworkIdentity::generate(Role::Shard);
        assert!(m.release_bound(&claimer.claim_key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn query_position_finds_claimed_bound() {
        let m = manifest();
        let b = GridBound::new(BoundsId(3), Vec3::ZERO, Vec3::splat(10.0));
        m.seed_pending(&[b]).await.unwrap();
        let claimer = NetworkIdentity::generate(Role::Shard);
        m.claim_next_pending(&claimer.claim_key()).await.unwrap();

        assert_eq!(m.query_position(Vec3::new(5.0, 5.0, 5.0)).await.unwrap(), Some(BoundsId(3)));
        assert_eq!(m.query_position(Vec3::new(50.0, 50.0, 50.0)).await.unwrap(), None);
    }
}
