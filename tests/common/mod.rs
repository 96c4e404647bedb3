//! Shared scaffolding for the scenario tests: two or three
//! in-process `ShardRuntime`s sharing one `MemoryManifestStore` and
//! talking over loopback TCP, standing in for a real cluster.

use std::sync::Arc;
use std::time::Duration;

use atlas_core::bound::GridBound;
use atlas_core::identity::Role;
use atlas_core::{BoundsId, NetworkIdentity};
use atlas_manifest::{MemoryManifestStore, ManifestStore};
use atlas_runtime::{ShardRuntime, ShardRuntimeConfig};
use glam::Vec3;
use tokio_util::sync::CancellationToken;

/// Test-scale tunables: short enough that a `#[tokio::test]` finishes in
/// well under a second of wall time, long enough to exercise real polling
/// and retry logic instead of racing it.
pub fn fast_runtime_config() -> ShardRuntimeConfig {
    let mut config = ShardRuntimeConfig::default();
    config.entity_scan_period = Duration::from_millis(10);
    config.transfer_tick_period = Duration::from_millis(10);
    config.bound_poll_interval = Duration::from_millis(10);
    config.telemetry_period = Duration::from_millis(200);
    config.transfer.prepare_timeout = Duration::from_millis(100);
    config.transfer.commit_timeout = Duration::from_millis(300);
    config.transfer.handoff_lead_ticks = 3;
    config.handoff.probe_interval = Duration::from_millis(20);
    config.handoff.inactivity_timeout = Duration::from_secs(5);
    config
}

pub struct Harness {
    pub store: Arc<dyn ManifestStore>,
    pub shards: Vec<Arc<ShardRuntime<GridBound>>>,
    pub stop: CancellationToken,
}

impl Harness {
    /// Spins up `n` shards sharing a fresh in-memory store, seeds `bounds`
    /// as the pending set, starts every shard, and waits until each has
    /// claimed exactly one bound and every pair is mutually registered.
    pub async fn spawn(n: usize, bounds: Vec<GridBound>) -> Self {
        let store: Arc<dyn ManifestStore> = Arc::new(MemoryManifestStore::new());
        let heuristic = atlas_heuristic::HeuristicManifest::<GridBound>::new(store.clone());
        heuristic.seed_pending(&bounds).await.unwrap();

        let stop = CancellationToken::new();
        let mut shards = Vec::with_capacity(n);
        for _ in 0..n {
            let identity = NetworkIdentity::generate(Role::Shard);
            let runtime = ShardRuntime::<GridBound>::new(
                identity,
                "127.0.0.1:0".parse().unwrap(),
                store.clone(),
                fast_runtime_config(),
            );
            runtime.start(stop.clone()).await.unwrap();
            shards.push(runtime);
        }

        let harness = Self { store, shards, stop };
        harness.wait_until(Duration::from_secs(2), || {
            harness.shards.iter().all(|s| s.leaser().has_bound())
        }).await;
        harness
    }

    pub async fn wait_until(&self, timeout: Duration, mut pred: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if pred() {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("condition did not become true within {timeout:?}");
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub async fn shutdown(self) {
        self.stop.cancel();
        for shard in &self.shards {
            let _ = shard.shutdown().await;
        }
    }
}

pub fn grid(id: u32, min: Vec3, max: Vec3) -> GridBound {
    GridBound::new(BoundsId(id), min, max)
}

pub fn two_adjacent_bounds() -> Vec<GridBound> {
    vec![
        grid(1, Vec3::new(0.0, 0.0, 0.0), Vec3::new(10.0, 10.0, 10.0)),
        grid(2, Vec3::new(10.0, 0.0, 0.0), Vec3::new(20.0, 10.0, 10.0)),
    ]
}
