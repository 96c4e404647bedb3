//! Configuration for the `coordinator` binary.

use std::time::Duration;

use clap::Parser;

/// atlas-coordinator - read-only cluster visibility over the manifest
/// store: registry, authority table, and link telemetry
/// (`spec.md` §4.7/§4.8, `SPEC_FULL` §2's "dashboards/ops visibility"
/// collaborator).
#[derive(Parser, Debug, Clone)]
#[command(name = "coordinator")]
#[command(about = "Prints a snapshot of cluster-wide shard authority and link telemetry")]
pub struct Config {
    /// Manifest store host.
    #[arg(long, env = "INTERNAL_REDIS_SERVICE_NAME")]
    pub redis_host: Option<String>,

    /// Manifest store port.
    #[arg(long, env = "INTERNAL_REDIS_PORT")]
    pub redis_port: Option<u16>,

    /// Print one snapshot and exit instead of refreshing on a loop.
    #[arg(long)]
    pub once: bool,

    /// Refresh period when not run with `--once`, in seconds.
    #[arg(long, default_value = "2")]
    pub refresh_interval_s: u64,
}

impl Config {
    pub fn redis_host(&self) -> String {
        self.redis_host.clone().unwrap_or_else(|| "localhost".to_string())
    }

    pub fn redis_port(&self) -> u16 {
        self.redis_port.unwrap_or(6379)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_s)
    }
}
