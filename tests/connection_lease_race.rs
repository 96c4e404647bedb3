//! S6 / P6: two shards concurrently try to acquire the connection lease
//! for each other at the same instant. Exactly one wins; the loser does
//! not proceed to dial.

use std::sync::Arc;

use atlas_core::identity::Role;
use atlas_core::NetworkIdentity;
use atlas_handoff::{HandoffConfig, HandoffConnectionManager};
use atlas_manifest::MemoryManifestStore;
use atlas_net::{AllowAllAuthorizer, Transport};
use atlas_registry::ServerRegistry;

#[tokio::test]
async fn concurrent_lease_acquisition_yields_exactly_one_winner() {
    let store: Arc<dyn atlas_manifest::ManifestStore> = Arc::new(MemoryManifestStore::new());
    let registry = Arc::new(ServerRegistry::new(store.clone()));

    let sx = NetworkIdentity::generate(Role::Shard);
    let sy = NetworkIdentity::generate(Role::Shard);
    let (transport_x, _rx_x) = Transport::new(sx, "127.0.0.1:0".parse().unwrap(), Arc::new(AllowAllAuthorizer));
    let (transport_y, _rx_y) = Transport::new(sy, "127.0.0.1:0".parse().unwrap(), Arc::new(AllowAllAuthorizer));

    let mgr_x = Arc::new(HandoffConnectionManager::new(
        store.clone(),
        transport_x,
        registry.clone(),
        sx,
        HandoffConfig::default(),
    ));
    let mgr_y = Arc::new(HandoffConnectionManager::new(
        store.clone(),
        transport_y,
        registry.clone(),
        sy,
        HandoffConfig::default(),
    ));

    let (x_result, y_result) = tokio::join!(mgr_x.try_acquire_or_refresh_lease(sy), mgr_y.try_acquire_or_refresh_lease(sx));
    let x_won = x_result.unwrap();
    let y_won = y_result.unwrap();

    assert_ne!(x_won, y_won, "exactly one side must win the lease race");

    // The loser must keep losing until the winner releases or the lease
    // TTLs out, matching lease_key's shared-key symmetry (spec.md 4.6).
    if x_won {
        assert!(!mgr_y.try_acquire_or_refresh_lease(sx).await.unwrap());
        mgr_x.release_lease(sy).await.unwrap();
        assert!(mgr_y.try_acquire_or_refresh_lease(sx).await.unwrap());
    } else {
        assert!(!mgr_x.try_acquire_or_refresh_lease(sy).await.unwrap());
        mgr_y.release_lease(sx).await.unwrap();
        assert!(mgr_x.try_acquire_or_refresh_lease(sy).await.unwrap());
    }
}
