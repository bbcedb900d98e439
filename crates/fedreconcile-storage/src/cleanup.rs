//! Periodic sweeping of scratch storage
//!
//! Per-lease reclaim tasks handle the normal path. The sweeper is the backstop:
//! it reclaims leases whose deadline passed without their task running and
//! removes lease directories no registry entry owns (left over from a previous
//! process, for instance).

use crate::lease::LeaseRegistry;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::time::sleep;

/// Statistics about one sweep
#[derive(Debug, Clone, Default)]
pub struct SweepStats {
    /// Registered leases reclaimed because their grace window closed
    pub expired_reclaimed: u64,
    /// Unregistered lease directories removed
    pub orphans_removed: u64,
    /// Duration of the sweep in milliseconds
    pub duration_ms: u64,
}

/// Run one sweep over the registry and its scratch root
pub async fn sweep(registry: &LeaseRegistry) -> SweepStats {
    let start = Instant::now();
    let mut stats = SweepStats::default();

    for lease in registry.expired_leases(Instant::now()) {
        if registry.reclaim(&lease).await {
            stats.expired_reclaimed += 1;
        }
    }

    match registry.store().list_lease_dirs().await {
        Ok(dirs) => {
            let now = SystemTime::now();
            for (lease, modified) in dirs {
                if registry.contains(&lease) {
                    continue;
                }
                // Directories younger than the grace window may belong to a
                // lease that is being acquired right now.
                let age = now.duration_since(modified).unwrap_or_default();
                if age < registry.grace() {
                    continue;
                }
                match registry.store().remove_lease_dir(&lease).await {
                    Ok(_) => stats.orphans_removed += 1,
                    Err(e) => tracing::warn!("Failed to remove orphaned lease {}: {}", lease, e),
                }
            }
        }
        Err(e) => tracing::warn!(
            "Failed to list scratch root {:?}: {}",
            registry.store().root(),
            e
        ),
    }

    stats.duration_ms = start.elapsed().as_millis() as u64;

    if stats.expired_reclaimed > 0 || stats.orphans_removed > 0 {
        tracing::info!(
            "Scratch sweep: reclaimed {} expired leases, removed {} orphans in {}ms",
            stats.expired_reclaimed,
            stats.orphans_removed,
            stats.duration_ms
        );
    }

    stats
}

/// Handle for the background sweeper task
pub struct SweeperTask {
    shutdown_tx: tokio::sync::mpsc::Sender<()>,
}

impl SweeperTask {
    /// Signal the sweeper to shutdown gracefully
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Spawn a background sweeper that runs once immediately and then on `interval`
pub fn spawn_sweeper(registry: Arc<LeaseRegistry>, interval: Duration) -> SweeperTask {
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);

    tokio::spawn(async move {
        tracing::info!(
            "Starting scratch sweeper for {:?} (interval: {}s)",
            registry.store().root(),
            interval.as_secs()
        );

        sweep(&registry).await;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Scratch sweeper shutting down");
                    break;
                }
                _ = sleep(interval) => {
                    sweep(&registry).await;
                }
            }
        }
    });

    SweeperTask { shutdown_tx }
}
