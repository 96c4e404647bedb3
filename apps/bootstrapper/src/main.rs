//! bootstrapper - carves the world into a grid and seeds the
//! pending-bounds set (`spec.md` §4.2's "whatever seeds the pending set"
//! collaborator, left unspecified by the core).

mod config;

use std::process::ExitCode;
use std::sync::Arc;

use atlas_core::bound::GridBound;
use atlas_core::BoundsId;
use atlas_heuristic::HeuristicManifest;
use atlas_manifest::{ConnectRetryPolicy, ManifestStore, RedisManifestStore};
use clap::Parser;
use glam::Vec3;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::Config;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("atlas_bootstrapper=info".parse().unwrap()))
        .init();

    let config = Config::parse();
    if let Err(e) = config.validate() {
        tracing::error!("invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("bootstrap failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let store: Arc<dyn ManifestStore> = Arc::new(
        RedisManifestStore::connect(&config.redis_host(), config.redis_port(), ConnectRetryPolicy::default()).await?,
    );
    let manifest = HeuristicManifest::<GridBound>::new(store);

    let pending = manifest.get_all_pending().await?;
    let claimed = manifest.get_all_claimed().await?;
    if !config.force && (!pending.is_empty() || !claimed.is_empty()) {
        anyhow::bail!(
            "cluster already carved ({} pending, {} claimed bounds); pass --force to re-seed",
            pending.len(),
            claimed.len()
        );
    }

    let bounds = carve_grid(&config);
    info!(count = bounds.len(), "seeding pending bounds");
    manifest.seed_pending(&bounds).await?;

    manifest.set_active_heuristic_type(&config.heuristic_name).await?;
    info!(heuristic = %config.heuristic_name, "recorded active heuristic type");

    if !claimed.is_empty() {
        warn!(
            count = claimed.len(),
            "previously claimed bounds were left in place; shards holding them keep their authority"
        );
    }

    Ok(())
}

/// Evenly divides the world `[0, world_size)` into `cells_x * cells_y *
/// cells_z` axis-aligned `GridBound`s, numbered in x-major, then y, then
/// z order starting at `BoundsId(1)` (0 is reserved as "no bound").
fn carve_grid(config: &Config) -> Vec<GridBound> {
    let cell = Vec3::new(
        config.world_size_x / config.cells_x as f32,
        config.world_size_y / config.cells_y as f32,
        config.world_size_z / config.cells_z as f32,
    );

    let mut bounds = Vec::with_capacity((config.cells_x * config.cells_y * config.cells_z) as usize);
    let mut next_id = 1u32;
    for z in 0..config.cells_z {
        for y in 0..config.cells_y {
            for x in 0..config.cells_x {
                let min = Vec3::new(x as f32 * cell.x, y as f32 * cell.y, z as f32 * cell.z);
                let max = min + cell;
                bounds.push(GridBound::new(BoundsId(next_id), min, max));
                next_id += 1;
            }
        }
    }
    bounds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carve_grid_partitions_without_overlap() {
        let config = Config {
            redis_host: None,
            redis_port: None,
            world_size_x: 20.0,
            world_size_y: 20.0,
            world_size_z: 1.0,
            cells_x: 2,
            cells_y: 2,
            cells_z: 1,
            heuristic_name: "grid".into(),
            force: false,
        };
        let bounds = carve_grid(&config);
        assert_eq!(bounds.len(), 4);

        use atlas_core::Bound;
        let shared_edge = Vec3::new(10.0, 5.0, 0.0);
        let owners = bounds.iter().filter(|b| b.contains(shared_edge)).count();
        assert_eq!(owners, 1, "shared edge must belong to exactly one bound");
    }
}
