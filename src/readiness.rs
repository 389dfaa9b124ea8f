// ===========================================
// Imports
// ===========================================
use anyhow::{bail, Context};
use log::{debug, info};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{lookup_host, TcpStream};
use tokio::time::{sleep, timeout, Instant};

use crate::config_loader::{ReadinessConfig, ReadinessMode};
use crate::server::ServerProcess;

// ===========================================
// Section 1: Single Probe
// ===========================================

/// One TCP connect attempt, bounded by `connect_timeout` when one is given.
pub async fn probe_once(addr: SocketAddr, connect_timeout: Option<Duration>) -> bool {
    match connect_timeout {
        Some(limit) => matches!(timeout(limit, TcpStream::connect(addr)).await, Ok(Ok(_))),
        None => TcpStream::connect(addr).await.is_ok(),
    }
}

async fn resolve(address: &str) -> anyhow::Result<SocketAddr> {
    lookup_host(address)
        .await
        .with_context(|| format!("failed to resolve '{}'", address))?
        .next()
        .with_context(|| format!("no address found for '{}'", address))
}

// ===========================================
// Section 2: Polling Loop
// ===========================================

/// Polls `cfg.address` until it accepts a connection or `cfg.timeout()` elapses.
///
/// Gives up early once the server process has exited, when one is given.
pub async fn wait_for_tcp(
    cfg: &ReadinessConfig,
    mut server: Option<&mut ServerProcess>,
) -> anyhow::Result<()> {
    let addr = resolve(&cfg.address).await?;
    let deadline = Instant::now() + cfg.timeout();
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        if probe_once(addr, cfg.connect_timeout()).await {
            info!("Server ready on {} after {} attempt(s)", addr, attempts);
            return Ok(());
        }

        if let Some(server) = server.as_deref_mut() {
            if let Some(status) = server.try_exited()? {
                bail!("server exited before becoming ready ({})", status);
            }
        }

        if Instant::now() >= deadline {
            bail!(
                "{} did not become ready within {:?} ({} attempts)",
                addr,
                cfg.timeout(),
                attempts
            );
        }
        debug!("{} not ready yet (attempt {})", addr, attempts);
        sleep(cfg.poll_interval()).await;
    }
}

// ===========================================
// Section 3: Entry Point
// ===========================================

/// Blocks until the server is considered ready, according to `cfg.mode`.
pub async fn wait_until_ready(
    cfg: &ReadinessConfig,
    server: Option<&mut ServerProcess>,
) -> anyhow::Result<()> {
    match cfg.mode {
        ReadinessMode::Probe => wait_for_tcp(cfg, server).await,
        ReadinessMode::Delay => {
            info!("Waiting {:?} for the server to start", cfg.startup_delay());
            sleep(cfg.startup_delay()).await;
            Ok(())
        }
    }
}
