//! S4 / P7: four shards race over two pending bounds. Exactly two end up
//! claiming one each; the other two never succeed no matter how long
//! they keep polling.

use std::sync::Arc;
use std::time::Duration;

use atlas_core::bound::GridBound;
use atlas_core::identity::Role;
use atlas_core::{BoundsId, NetworkIdentity};
use atlas_heuristic::HeuristicManifest;
use atlas_manifest::MemoryManifestStore;
use glam::Vec3;

#[tokio::test]
async fn exactly_two_of_four_shards_claim_the_two_bounds() {
    let store: Arc<dyn atlas_manifest::ManifestStore> = Arc::new(MemoryManifestStore::new());
    let manifest = Arc::new(HeuristicManifest::<GridBound>::new(store));

    let bounds = vec![
        GridBound::new(BoundsId(1), Vec3::ZERO, Vec3::new(10.0, 10.0, 10.0)),
        GridBound::new(BoundsId(2), Vec3::new(10.0, 0.0, 0.0), Vec3::new(20.0, 10.0, 10.0)),
    ];
    manifest.seed_pending(&bounds).await.unwrap();

    let shards: Vec<NetworkIdentity> = (0..4).map(|_| NetworkIdentity::generate(Role::Shard)).collect();

    let mut tasks = Vec::new();
    for shard in shards.clone() {
        let manifest = manifest.clone();
        tasks.push(tokio::spawn(async move {
            let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
            loop {
                if let Some(bound) = manifest.claim_next_pending(&shard.claim_key()).await.unwrap() {
                    return Some(bound.id);
                }
                if tokio::time::Instant::now() >= deadline {
                    return None;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }));
    }

    let mut claimed_ids = Vec::new();
    let mut winners = 0;
    for task in tasks {
        if let Some(id) = task.await.unwrap() {
            winners += 1;
            claimed_ids.push(id);
        }
    }

    assert_eq!(winners, 2, "exactly two of the four shards must claim a bound");
    claimed_ids.sort();
    assert_eq!(claimed_ids, vec![BoundsId(1), BoundsId(2)]);
    assert!(manifest.get_all_pending().await.unwrap().is_empty());

    let claimed = manifest.get_all_claimed().await.unwrap();
    assert_eq!(claimed.len(), 2);
}
