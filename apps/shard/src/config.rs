//! Configuration for the `shard` binary.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

/// atlas-shard - spatial-partition simulation shard
#[derive(Parser, Debug, Clone)]
#[command(name = "shard")]
#[command(about = "Runs one shard of the distributed spatial-partition simulation")]
pub struct Config {
    /// Local address to bind the shard-to-shard transport listener on.
    /// Port 0 picks an ephemeral port.
    #[arg(long, env = "ATLAS_LISTEN", default_value = "0.0.0.0:0")]
    pub listen: SocketAddr,

    /// IP address other shards should dial to reach this one. Defaults to
    /// the address of the interface that would be used to reach the
    /// manifest store (the container IP in a real deployment).
    #[arg(long, env = "ATLAS_ADVERTISE_IP")]
    pub advertise_ip: Option<std::net::IpAddr>,

    /// Manifest store host. Falls back to `INTERNAL_REDIS_SERVICE_NAME`,
    /// then `localhost`, matching `spec.md` §6.
    #[arg(long, env = "INTERNAL_REDIS_SERVICE_NAME")]
    pub redis_host: Option<String>,

    /// Manifest store port. Falls back to `INTERNAL_REDIS_PORT`, then
    /// 6379.
    #[arg(long, env = "INTERNAL_REDIS_PORT")]
    pub redis_port: Option<u16>,

    /// Max manifest-store connect retries before giving up at startup.
    #[arg(long, default_value = "10")]
    pub redis_max_retries: u32,

    /// Delay between manifest-store connect retries, in milliseconds.
    #[arg(long, default_value = "500")]
    pub redis_retry_interval_ms: u64,

    /// Entity ledger scan period, in milliseconds (`spec.md` §6:
    /// `ledger_scan_period_ms`).
    #[arg(long, default_value = "50")]
    pub ledger_scan_period_ms: u64,

    /// Transfer coordinator tick period, in milliseconds.
    #[arg(long, default_value = "50")]
    pub transfer_tick_period_ms: u64,

    /// Bound-claim poll interval, in milliseconds.
    #[arg(long, default_value = "100")]
    pub bound_poll_interval_ms: u64,

    /// Handoff connection liveness probe interval, in seconds
    /// (`spec.md` §6: `probe_interval_s`).
    #[arg(long, default_value = "5")]
    pub probe_interval_s: u64,

    /// Telemetry publish period, in milliseconds.
    #[arg(long, default_value = "1000")]
    pub telemetry_period_ms: u64,

    /// Prepare-stage retry timeout, in milliseconds.
    #[arg(long, default_value = "500")]
    pub prepare_timeout_ms: u64,

    /// Maximum Prepare retries before aborting a transfer.
    #[arg(long, default_value = "5")]
    pub max_prepare_retries: u32,

    /// Commit-stage timeout waiting for Complete, in milliseconds.
    #[arg(long, default_value = "2000")]
    pub commit_timeout_ms: u64,

    /// Ticks between Commit and a receiver adopting the entity
    /// (`spec.md` §6: `handoff_lead_ticks`).
    #[arg(long, default_value = "6")]
    pub handoff_lead_ticks: u64,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.prepare_timeout_ms == 0 {
            anyhow::bail!("prepare-timeout-ms must be nonzero");
        }
        if self.max_prepare_retries == 0 {
            anyhow::bail!("max-prepare-retries must be nonzero");
        }
        Ok(())
    }

    pub fn redis_host(&self) -> String {
        self.redis_host.clone().unwrap_or_else(|| "localhost".to_string())
    }

    pub fn redis_port(&self) -> u16 {
        self.redis_port.unwrap_or(6379)
    }

    pub fn to_runtime_config(&self) -> atlas_runtime::ShardRuntimeConfig {
        atlas_runtime::ShardRuntimeConfig {
            entity_scan_period: Duration::from_millis(self.ledger_scan_period_ms),
            transfer_tick_period: Duration::from_millis(self.transfer_tick_period_ms),
            bound_poll_interval: Duration::from_millis(self.bound_poll_interval_ms),
            telemetry_period: Duration::from_millis(self.telemetry_period_ms),
            transfer: atlas_transfer_config(self),
            handoff: atlas_handoff_config(self),
        }
    }
}

fn atlas_transfer_config(c: &Config) -> atlas_transfer::TransferConfig {
    atlas_transfer::TransferConfig {
        prepare_timeout: Duration::from_millis(c.prepare_timeout_ms),
        max_prepare_retries: c.max_prepare_retries,
        commit_timeout: Duration::from_millis(c.commit_timeout_ms),
        handoff_lead_ticks: c.handoff_lead_ticks,
    }
}

fn atlas_handoff_config(c: &Config) -> atlas_handoff::HandoffConfig {
    let probe_interval = Duration::from_secs(c.probe_interval_s);
    atlas_handoff::HandoffConfig {
        probe_interval,
        inactivity_timeout: Duration::from_secs(30),
        lease_ttl: probe_interval * 3,
        lease_enabled: true,
    }
}
