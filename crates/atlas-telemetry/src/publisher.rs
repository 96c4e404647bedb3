//! `TelemetryPublisher` (C10, `spec.md` §4.7): a per-shard background task
//! that publishes per-connection link stats and the current entity→owner
//! table into the manifest store for dashboards, grounded in
//! `Web/src/NetworkTelemetry.hpp` and `ConnectionTelemetry.hpp`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use atlas_core::{AtlasEntityId, NetworkIdentity};
use atlas_entity::EntityLedger;
use atlas_manifest::ManifestStore;
use atlas_net::transport::{AllowAllAuthorizer, Transport};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::Result;

/// Manifest-store table names, exposed for read-only dashboard queries
/// (e.g. `apps/coordinator`) that need to read these tables without
/// going through a full `TelemetryPublisher`.
pub const NETWORK_TELEMETRY_KEY: &str = "Network_Telemetry";
pub const ENTITY_AUTHORITY_KEY: &str = "EntityAuthority";

const DEFAULT_PERIOD: Duration = Duration::from_secs(1);

/// Publishes this shard's connection stats and owned-entity set on a
/// fixed period (default ~1s, `_NETWORK_TELEMETRY_PING_INTERVAL_MS`).
pub struct TelemetryPublisher {
    store: Arc<dyn ManifestStore>,
    transport: Arc<Transport>,
    ledger: Arc<EntityLedger>,
    self_identity: NetworkIdentity,
    period: Duration,
    published_entities: Mutex<HashSet<AtlasEntityId>>,
}

impl TelemetryPublisher {
    pub fn new(
        store: Arc<dyn ManifestStore>,
        transport: Arc<Transport>,
        ledger: Arc<EntityLedger>,
        self_identity: NetworkIdentity,
    ) -> Self {
        Self {
            store,
            transport,
            ledger,
            self_identity,
            period: DEFAULT_PERIOD,
            published_entities: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Encodes this shard's current per-connection stats and `HSET`s them
    /// under `self_identity`'s claim key.
    pub async fn publish_connection_stats(&self) -> Result<()> {
        let stats = self.transport.get_connection_telemetry();
        let blob = postcard::to_allocvec(&stats)?;
        self.store
            .hset(NETWORK_TELEMETRY_KEY, &self.self_identity.claim_key(), &blob)
            .await?;
        Ok(())
    }

    /// Diffs the ledger's current entity set against what this shard last
    /// published: newly-owned ids are written, ids no longer owned (moved
    /// away or erased) are removed, so the table never accumulates stale
    /// ownership claims from a previous tick.
    pub async fn publish_entity_authority(&self) -> Result<()> {
        let current: HashSet<AtlasEntityId> = self.ledger.snapshot_minimal().into_iter().map(|e| e.entity_id).collect();
        let previous = std::mem::replace(&mut *self.published_entities.lock(), current.clone());

        for id in current.difference(&previous) {
            self.store
                .hset(ENTITY_AUTHORITY_KEY, &id.0.to_string(), self.self_identity.claim_key().as_bytes())
                .await?;
        }
        for id in previous.difference(&current) {
            self.store.hdel(ENTITY_AUTHORITY_KEY, &id.0.to_string()).await?;
        }
        Ok(())
    }

    pub async fn run(self: Arc<Self>, stop: CancellationToken) {
        loop {
            if stop.is_cancelled() {
                return;
            }

            if let Err(e) = self.publish_connection_stats().await {
                warn!(error = %e, "failed to publish connection telemetry");
            }
            if let Err(e) = self.publish_entity_authority().await {
                warn!(error = %e, "failed to publish entity authority table");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.period) => {}
                _ = stop.cancelled() => return,
            }
        }
    }
}
