//! shard - one process authoritative for one spatial bound.
//!
//! Claims a bound via `BoundLeaser`, simulates the entities inside it,
//! and hands them off to neighboring shards as they cross into another
//! bound (`spec.md` §1-§2).

mod config;

use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::process::ExitCode;
use std::sync::Arc;

use atlas_core::bound::GridBound;
use atlas_core::identity::{NetworkIdentity, Role};
use atlas_manifest::{ConnectRetryPolicy, ManifestStore, RedisManifestStore};
use atlas_runtime::ShardRuntime;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::Config;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("atlas_shard=info".parse().unwrap()))
        .init();

    let config = Config::parse();
    if let Err(e) = config.validate() {
        error!("invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("shard exited with error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let self_identity = NetworkIdentity::generate(Role::Shard);
    info!(%self_identity, "starting shard");

    let store: Arc<dyn ManifestStore> = Arc::new(
        RedisManifestStore::connect(
            &config.redis_host(),
            config.redis_port(),
            ConnectRetryPolicy {
                max_retries: config.redis_max_retries,
                interval: std::time::Duration::from_millis(config.redis_retry_interval_ms),
            },
        )
        .await?,
    );

    let runtime = ShardRuntime::<GridBound>::new(self_identity, config.listen, store, config.to_runtime_config());

    let advertise_ip = config.advertise_ip.unwrap_or_else(discover_local_ip);
    let stop = CancellationToken::new();
    let bound_addr = runtime.start(stop.clone()).await?;
    let advertised = SocketAddr::new(advertise_ip, bound_addr.port());
    info!(%advertised, "shard listening");

    // The transport registers the raw bound address; re-register under
    // the address other shards can actually dial if it differs (e.g.
    // 0.0.0.0 is never dialable from another host).
    if advertised != bound_addr {
        runtime.registry().register_self(self_identity, advertised).await?;
    }

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, releasing bound and deregistering");
    stop.cancel();
    runtime.shutdown().await?;

    Ok(())
}

/// Self-discovers the address other processes should use to reach this
/// one, approximating the "container IP" self-discovery `spec.md` §6
/// describes. Opens a UDP socket and connects it to an arbitrary external
/// address to learn which local interface the OS routing table would
/// pick; no packets are actually sent (UDP `connect` only binds a route).
fn discover_local_ip() -> IpAddr {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(std::net::Ipv4Addr::LOCALHOST))
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
