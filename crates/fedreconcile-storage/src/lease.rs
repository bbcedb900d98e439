//! Leases over staged files
//!
//! Every relay call acquires a [`LeaseGuard`]. Staged files live in the lease's
//! private directory. Releasing the guard starts the grace window; when it ends
//! the lease is revoked and its directory reclaimed. A guard dropped without
//! release (handler cancelled or panicked) reclaims immediately.

use crate::error::{StorageError, StorageResult};
use crate::naming::is_safe_file_name;
use crate::scratch::ScratchStore;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Unguessable lease identifier (122 random bits, 32 lowercase hex chars)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseId(String);

impl LeaseId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Accept only the exact shape produced by [`LeaseId::generate`]
    pub fn parse(value: &str) -> Option<Self> {
        let well_formed = value.len() == 32
            && value
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        well_formed.then(|| Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
struct LeaseEntry {
    /// `None` while the owning request is still in flight
    deadline: Option<Instant>,
    files: Vec<String>,
}

/// Counters describing reclaim activity since startup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimStats {
    pub leases_reclaimed: u64,
    pub reclaim_failures: u64,
    pub bytes_freed: u64,
}

/// Registry of live leases over a scratch store
pub struct LeaseRegistry {
    store: ScratchStore,
    leases: DashMap<LeaseId, LeaseEntry>,
    grace: Duration,
    leases_reclaimed: AtomicU64,
    reclaim_failures: AtomicU64,
    bytes_freed: AtomicU64,
}

impl LeaseRegistry {
    pub fn new(store: ScratchStore, grace: Duration) -> Self {
        Self {
            store,
            leases: DashMap::new(),
            grace,
            leases_reclaimed: AtomicU64::new(0),
            reclaim_failures: AtomicU64::new(0),
            bytes_freed: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &ScratchStore {
        &self.store
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Number of leases not yet reclaimed
    pub fn active_leases(&self) -> usize {
        self.leases.len()
    }

    pub fn contains(&self, lease: &LeaseId) -> bool {
        self.leases.contains_key(lease)
    }

    pub fn stats(&self) -> ReclaimStats {
        ReclaimStats {
            leases_reclaimed: self.leases_reclaimed.load(Ordering::Relaxed),
            reclaim_failures: self.reclaim_failures.load(Ordering::Relaxed),
            bytes_freed: self.bytes_freed.load(Ordering::Relaxed),
        }
    }

    /// Open a new lease with its own scratch directory
    pub async fn acquire(self: &Arc<Self>) -> StorageResult<LeaseGuard> {
        let id = LeaseId::generate();
        self.store.create_lease_dir(&id).await?;
        self.leases.insert(
            id.clone(),
            LeaseEntry {
                deadline: None,
                files: Vec::new(),
            },
        );

        debug!("Acquired lease {}", id);

        Ok(LeaseGuard {
            id,
            registry: Arc::clone(self),
            released: false,
        })
    }

    /// True while the lease exists and its grace window is open
    pub fn is_live(&self, lease: &LeaseId) -> bool {
        self.is_live_at(lease, Instant::now())
    }

    fn is_live_at(&self, lease: &LeaseId, now: Instant) -> bool {
        self.leases
            .get(lease)
            .is_some_and(|entry| entry.deadline.is_none_or(|deadline| now < deadline))
    }

    /// Read a staged file, honoring the lease deadline
    pub async fn read(&self, lease: &LeaseId, name: &str) -> StorageResult<Vec<u8>> {
        if !is_safe_file_name(name) {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        if !self.is_live(lease) {
            return Err(StorageError::UnknownLease(lease.to_string()));
        }

        self.store.read(lease, name).await
    }

    /// Files staged under a lease so far
    pub fn files(&self, lease: &LeaseId) -> Vec<String> {
        self.leases
            .get(lease)
            .map(|entry| entry.files.clone())
            .unwrap_or_default()
    }

    /// Revoke a lease and delete its directory
    ///
    /// Failures are logged and counted, never returned.
    pub async fn reclaim(&self, lease: &LeaseId) -> bool {
        let removed = self.leases.remove(lease).is_some();

        match self.store.remove_lease_dir(lease).await {
            Ok(freed) => {
                if removed {
                    self.leases_reclaimed.fetch_add(1, Ordering::Relaxed);
                }
                self.bytes_freed.fetch_add(freed, Ordering::Relaxed);
                debug!("Reclaimed lease {} ({} bytes)", lease, freed);
                removed
            }
            Err(e) => {
                self.reclaim_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to reclaim lease {}: {}", lease, e);
                removed
            }
        }
    }

    /// Leases whose grace window has closed
    pub(crate) fn expired_leases(&self, now: Instant) -> Vec<LeaseId> {
        self.leases
            .iter()
            .filter(|entry| entry.deadline.is_some_and(|deadline| now >= deadline))
            .map(|entry| entry.key().clone())
            .collect()
    }

    fn record_file(&self, lease: &LeaseId, name: &str) {
        if let Some(mut entry) = self.leases.get_mut(lease)
            && !entry.files.iter().any(|f| f == name)
        {
            entry.files.push(name.to_string());
        }
    }

    fn start_grace(&self, lease: &LeaseId) -> Instant {
        let now = Instant::now();
        let deadline = now.checked_add(self.grace).unwrap_or_else(|| {
            warn!(
                "Grace window of {}s overflows the clock; reclaiming lease {} immediately",
                self.grace.as_secs(),
                lease
            );
            now
        });
        if let Some(mut entry) = self.leases.get_mut(lease) {
            entry.deadline = Some(deadline);
        }
        deadline
    }
}

/// Scoped ownership of one lease
///
/// Call [`LeaseGuard::release`] once the response is ready. Dropping the guard
/// without releasing closes the lease at once and removes its directory on a
/// runtime task, or inline when no runtime is running.
pub struct LeaseGuard {
    id: LeaseId,
    registry: Arc<LeaseRegistry>,
    released: bool,
}

impl LeaseGuard {
    pub fn id(&self) -> &LeaseId {
        &self.id
    }

    /// Stage a file under this lease; the name must already be sanitized
    pub async fn stage(&self, name: &str, bytes: &[u8]) -> StorageResult<()> {
        self.registry.store.write(&self.id, name, bytes).await?;
        self.registry.record_file(&self.id, name);
        debug!("Staged {} ({} bytes) under lease {}", name, bytes.len(), self.id);
        Ok(())
    }

    pub fn staged_files(&self) -> Vec<String> {
        self.registry.files(&self.id)
    }

    /// Open the grace window and schedule reclaim when it closes
    ///
    /// Must be called from within a tokio runtime.
    pub fn release(mut self) -> Instant {
        self.released = true;
        let deadline = self.registry.start_grace(&self.id);
        let registry = Arc::clone(&self.registry);
        let id = self.id.clone();

        info!(
            "Lease {} released; reclaim in {}ms",
            id,
            deadline.saturating_duration_since(Instant::now()).as_millis()
        );

        tokio::spawn(async move {
            tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
            registry.reclaim(&id).await;
        });

        deadline
    }
}

impl LeaseGuard {
    fn reclaim_blocking(&self) {
        self.registry.leases.remove(&self.id);
        match self.registry.store.remove_lease_dir_blocking(&self.id) {
            Ok(()) => {
                self.registry.leases_reclaimed.fetch_add(1, Ordering::Relaxed);
                debug!("Lease {} dropped outside a runtime; reclaimed", self.id);
            }
            Err(e) => {
                self.registry.reclaim_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to reclaim abandoned lease {}: {}", self.id, e);
            }
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        // Close the lease now; its directory goes on a runtime worker
        if let Some(mut entry) = self.registry.leases.get_mut(&self.id) {
            entry.deadline = Some(Instant::now());
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let registry = Arc::clone(&self.registry);
                let id = self.id.clone();
                debug!("Lease {} dropped before release; reclaiming", id);
                handle.spawn(async move {
                    registry.reclaim(&id).await;
                });
            }
            Err(_) => self.reclaim_blocking(),
        }
    }
}
