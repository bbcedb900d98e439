//! Scratch directory layout
//!
//! ```text
//! <root>/
//!   <lease-id>/
//!     gtas_report.csv
//!     erp_balances.csv
//!     exception_report.xlsx
//!     fbdi_journal_corrections.csv
//! ```
//!
//! Files are written to a hidden `.part` sibling and renamed into place so a
//! concurrent download never observes a partial artifact.

use crate::error::{StorageError, StorageResult};
use crate::lease::LeaseId;
use crate::naming::is_safe_file_name;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone)]
pub struct ScratchStore {
    root: PathBuf,
}

impl ScratchStore {
    /// Open (creating if needed) a scratch root
    pub fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lease_dir(&self, lease: &LeaseId) -> PathBuf {
        self.root.join(lease.as_str())
    }

    pub async fn create_lease_dir(&self, lease: &LeaseId) -> StorageResult<PathBuf> {
        let dir = self.lease_dir(lease);
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Write a file into a lease directory, replacing any earlier file of that name
    pub async fn write(&self, lease: &LeaseId, name: &str, bytes: &[u8]) -> StorageResult<PathBuf> {
        if !is_safe_file_name(name) {
            return Err(StorageError::InvalidName(name.to_string()));
        }

        let dir = self.lease_dir(lease);
        let final_path = dir.join(name);
        let temp_path = dir.join(format!(".{}.part", name));

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(&temp_path, &final_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        Ok(final_path)
    }

    pub async fn read(&self, lease: &LeaseId, name: &str) -> StorageResult<Vec<u8>> {
        if !is_safe_file_name(name) {
            return Err(StorageError::InvalidName(name.to_string()));
        }

        match fs::read(self.lease_dir(lease).join(name)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a lease directory and everything in it; returns bytes freed
    pub async fn remove_lease_dir(&self, lease: &LeaseId) -> StorageResult<u64> {
        let dir = self.lease_dir(lease);
        let freed = dir_size(&dir).await?;

        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(freed),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Synchronous variant used from `Drop`
    pub fn remove_lease_dir_blocking(&self, lease: &LeaseId) -> StorageResult<()> {
        match std::fs::remove_dir_all(self.lease_dir(lease)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Lease directories currently on disk with their modification times
    ///
    /// Entries whose names are not lease identifiers are ignored.
    pub async fn list_lease_dirs(&self) -> StorageResult<Vec<(LeaseId, SystemTime)>> {
        let mut found = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(found),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let Some(lease) = entry.file_name().to_str().and_then(LeaseId::parse) else {
                continue;
            };
            let metadata = entry.metadata().await?;
            if metadata.is_dir() {
                found.push((lease, metadata.modified()?));
            }
        }

        Ok(found)
    }
}

async fn dir_size(dir: &Path) -> StorageResult<u64> {
    let mut total = 0u64;
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if metadata.is_file() {
            total += metadata.len();
        }
    }

    Ok(total)
}
