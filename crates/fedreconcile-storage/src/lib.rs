//! FedReconcile Scratch Storage
//!
//! Ephemeral staging for uploaded inputs and returned artifacts:
//! - Scratch directory layout and atomic writes
//! - Leases that own every file staged by one relay call
//! - Deferred reclaim and a periodic sweeper for expired or orphaned leases

pub mod cleanup;
pub mod error;
pub mod lease;
pub mod naming;
pub mod scratch;

pub use cleanup::{SweepStats, SweeperTask, spawn_sweeper, sweep};
pub use error::{StorageError, StorageResult};
pub use lease::{LeaseGuard, LeaseId, LeaseRegistry, ReclaimStats};
pub use naming::{is_safe_file_name, sanitize_file_name};
pub use scratch::ScratchStore;
