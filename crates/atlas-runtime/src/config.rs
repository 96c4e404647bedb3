//! Tunables for a [`crate::ShardRuntime`] instance, layered over each
//! subsystem's own defaults.

use std::time::Duration;

use atlas_handoff::HandoffConfig;
use atlas_transfer::TransferConfig;

#[derive(Clone, Copy, Debug)]
pub struct ShardRuntimeConfig {
    pub entity_scan_period: Duration,
    pub transfer_tick_period: Duration,
    pub bound_poll_interval: Duration,
    pub telemetry_period: Duration,
    pub transfer: TransferConfig,
    pub handoff: HandoffConfig,
}

impl Default for ShardRuntimeConfig {
    fn default() -> Self {
        Self {
            entity_scan_period: Duration::from_millis(50),
            transfer_tick_period: Duration::from_millis(50),
            bound_poll_interval: Duration::from_millis(100),
            telemetry_period: Duration::from_secs(1),
            transfer: TransferConfig::default(),
            handoff: HandoffConfig::default(),
        }
    }
}
