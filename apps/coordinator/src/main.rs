//! coordinator - read-only cluster dashboard: prints the shard registry,
//! the heuristic's pending/claimed bound sets, and each shard's last
//! published link telemetry and entity authority counts (`spec.md`
//! §4.7/§4.8, collaborator named but left unimplemented by the core).

mod config;

use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;

use atlas_core::bound::GridBound;
use atlas_manifest::{ConnectRetryPolicy, ManifestStore, RedisManifestStore};
use atlas_net::ConnectionTelemetry;
use atlas_heuristic::HeuristicManifest;
use atlas_registry::ServerRegistry;
use atlas_telemetry::{ENTITY_AUTHORITY_KEY, NETWORK_TELEMETRY_KEY};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::Config;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("atlas_coordinator=info".parse().unwrap()))
        .init();

    let config = Config::parse();

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("coordinator failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let store: Arc<dyn ManifestStore> = Arc::new(
        RedisManifestStore::connect(&config.redis_host(), config.redis_port(), ConnectRetryPolicy::default()).await?,
    );
    let registry = ServerRegistry::new(store.clone());
    let manifest = HeuristicManifest::<GridBound>::new(store.clone());

    info!("coordinator connected, printing cluster snapshot");
    loop {
        if let Err(e) = print_snapshot(&registry, &manifest, &store).await {
            error!("failed to read snapshot: {e:#}");
        }
        if config.once {
            return Ok(());
        }
        tokio::time::sleep(config.refresh_interval()).await;
    }
}

async fn print_snapshot(
    registry: &ServerRegistry,
    manifest: &HeuristicManifest<GridBound>,
    store: &Arc<dyn ManifestStore>,
) -> anyhow::Result<()> {
    let peers = registry.list_all().await?;
    let pending = manifest.get_all_pending().await?;
    let claimed = manifest.get_all_claimed().await?;
    let heuristic = manifest.get_active_heuristic_type().await?;

    println!("=== atlas cluster snapshot ===");
    println!("active heuristic: {}", heuristic.as_deref().unwrap_or("(unset)"));
    println!("registered processes: {}", peers.len());
    for (identity, addr) in &peers {
        println!("  {identity:?}  {addr}");
    }
    println!("bounds: {} claimed, {} pending", claimed.len(), pending.len());
    for (claimant, bound) in &claimed {
        println!("  {claimant:?} holds bound {bound:?}");
    }

    let link_rows = store.hgetall(NETWORK_TELEMETRY_KEY).await?;
    println!("link telemetry: {} reporting shards", link_rows.len());
    for (claim_key, blob) in &link_rows {
        match postcard::from_bytes::<Vec<ConnectionTelemetry>>(blob) {
            Ok(conns) => {
                println!("  {claim_key}: {} connections", conns.len());
                for c in &conns {
                    println!(
                        "    peer={:?} state={:?} ping_ms={:.1} sent={} recv={} pending_unacked={}",
                        c.peer, c.state, c.ping_ms, c.packets_sent, c.packets_received, c.pending_unacked
                    );
                }
            }
            Err(e) => error!(shard = %claim_key, error = %e, "failed to decode telemetry blob"),
        }
    }

    let authority: HashMap<String, Vec<u8>> = store.hgetall(ENTITY_AUTHORITY_KEY).await?;
    println!("entity authority table: {} entries", authority.len());

    println!();
    Ok(())
}
