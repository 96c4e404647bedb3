//! S2 (scaled down for test wall-time): entities repeatedly cross shard
//! boundaries in a rotation; afterwards the union of every ledger still
//! contains each original entity exactly once (P1/P2).

mod common;

use std::collections::HashSet;
use std::time::Duration;

use atlas_core::types::Transform;
use atlas_core::AtlasEntity;
use common::Harness;
use glam::Vec3;

const ENTITY_COUNT: usize = 30;
const ROTATIONS: usize = 4;

fn bounds() -> Vec<atlas_core::bound::GridBound> {
    vec![
        common::grid(1, Vec3::new(0.0, 0.0, 0.0), Vec3::new(10.0, 10.0, 10.0)),
        common::grid(2, Vec3::new(10.0, 0.0, 0.0), Vec3::new(20.0, 10.0, 10.0)),
        common::grid(3, Vec3::new(20.0, 0.0, 0.0), Vec3::new(30.0, 10.0, 10.0)),
    ]
}

#[tokio::test]
async fn entities_rotating_through_three_bounds_end_up_exactly_once_each() {
    let harness = Harness::spawn(3, bounds()).await;
    let shard_for_bound = |bound_id: u32| {
        harness
            .shards
            .iter()
            .find(|s| s.leaser().get_bound().unwrap().id.0 == bound_id)
            .unwrap()
    };

    let mut ids = HashSet::new();
    let origin = shard_for_bound(1);
    for _ in 0..ENTITY_COUNT {
        let entity = AtlasEntity::new(
            Transform {
                world: 0,
                position: Vec3::new(5.0, 5.0, 0.0),
                bounding_box: Vec3::ONE,
            },
            vec![],
        );
        ids.insert(entity.entity_id);
        origin.ledger().register_new(entity).unwrap();
    }

    // Rotate every entity bound-1 -> bound-2 -> bound-3 -> bound-1, moving
    // it to the interior of the next bound each hop so the ledger scan
    // loop picks it up as out-of-bound and the transfer pipeline fires.
    let hops = [(1u32, 2u32, Vec3::new(12.0, 5.0, 0.0)), (2, 3, Vec3::new(22.0, 5.0, 0.0)), (3, 1, Vec3::new(2.0, 5.0, 0.0))];
    for _ in 0..ROTATIONS {
        for (from_bound, _to_bound, next_pos) in hops {
            let from = shard_for_bound(from_bound);
            for id in &ids {
                if let Some(mut e) = from.ledger().get(id) {
                    e.transform.position = next_pos;
                    from.ledger().upsert(e);
                }
            }
            harness
                .wait_until(Duration::from_secs(5), || {
                    ids.iter().all(|id| harness.shards.iter().filter(|s| s.ledger().get(id).is_some()).count() == 1)
                })
                .await;
        }
    }

    let mut seen = HashSet::new();
    for shard in &harness.shards {
        for entity in shard.ledger().snapshot_minimal() {
            assert!(seen.insert(entity.entity_id), "entity {:?} present in more than one ledger", entity.entity_id);
        }
    }
    assert_eq!(seen, ids, "union of ledgers must contain exactly the original entity set");

    harness.shutdown().await;
}
