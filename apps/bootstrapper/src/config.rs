//! Configuration for the `bootstrapper` binary.

use clap::Parser;

/// atlas-bootstrapper - seeds the pending-bounds set
///
/// The collaborator `spec.md` §4.2 leaves unspecified: "whatever seeds
/// the pending-bounds set". Carves the world into an evenly spaced grid
/// of `GridBound`s and publishes them to `Heuristic_Bounds_Pending`.
#[derive(Parser, Debug, Clone)]
#[command(name = "bootstrapper")]
#[command(about = "Seeds the pending-bounds set for a grid-carved world")]
pub struct Config {
    /// Manifest store host.
    #[arg(long, env = "INTERNAL_REDIS_SERVICE_NAME")]
    pub redis_host: Option<String>,

    /// Manifest store port.
    #[arg(long, env = "INTERNAL_REDIS_PORT")]
    pub redis_port: Option<u16>,

    /// World extent on the x axis, in world units.
    #[arg(long, default_value = "1000.0")]
    pub world_size_x: f32,

    /// World extent on the y axis, in world units.
    #[arg(long, default_value = "1000.0")]
    pub world_size_y: f32,

    /// World extent on the z axis, in world units (flat worlds keep this
    /// at 1 cell).
    #[arg(long, default_value = "100.0")]
    pub world_size_z: f32,

    /// Number of grid cells along x.
    #[arg(long, default_value = "4")]
    pub cells_x: u32,

    /// Number of grid cells along y.
    #[arg(long, default_value = "4")]
    pub cells_y: u32,

    /// Number of grid cells along z.
    #[arg(long, default_value = "1")]
    pub cells_z: u32,

    /// Name recorded as the cluster's active heuristic type.
    #[arg(long, default_value = "grid")]
    pub heuristic_name: String,

    /// Seed even if bounds are already pending or claimed. Without this,
    /// bootstrapper refuses to re-seed a cluster that is already carved,
    /// since `Heuristic_Bounds_Pending` must be empty before switching
    /// the active heuristic type (`spec.md` §4.2).
    #[arg(long)]
    pub force: bool,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cells_x == 0 || self.cells_y == 0 || self.cells_z == 0 {
            anyhow::bail!("cells-x/cells-y/cells-z must each be at least 1");
        }
        if self.world_size_x <= 0.0 || self.world_size_y <= 0.0 || self.world_size_z <= 0.0 {
            anyhow::bail!("world-size-x/y/z must be positive");
        }
        Ok(())
    }

    pub fn redis_host(&self) -> String {
        self.redis_host.clone().unwrap_or_else(|| "localhost".to_string())
    }

    pub fn redis_port(&self) -> u16 {
        self.redis_port.unwrap_or(6379)
    }
}
