//! Saved credential between CLI invocations

use anyhow::{Context, Result, anyhow};
use fedreconcile_core::ClientSession;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const CREDENTIAL_FILE: &str = ".fedreconcile/credential";

/// `~/.fedreconcile/credential`
pub fn default_path() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow!("Could not determine home directory"))?;
    Ok(home.join(CREDENTIAL_FILE))
}

pub fn save(path: &Path, session: &ClientSession) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let mut file = open_private(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    file.write_all(session.credential().as_bytes())
        .with_context(|| format!("Failed to write {}", path.display()))?;

    Ok(())
}

/// Open for writing, readable by the owner only from the moment it exists
#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // mode() only applies on creation; tighten a file left by an older save
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

/// Load a saved session that has not yet expired
///
/// An expired credential is deleted and treated as absent.
pub fn load(path: &Path) -> Result<Option<ClientSession>> {
    let credential = match std::fs::read_to_string(path) {
        Ok(credential) => credential,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };

    let session = ClientSession::from_credential(credential.trim())
        .with_context(|| format!("Unreadable credential in {}", path.display()))?;

    if session.ensure_valid().is_err() {
        tracing::debug!("Saved credential expired; removing {}", path.display());
        remove(path)?;
        return Ok(None);
    }

    Ok(Some(session))
}

/// Returns true when a credential was removed
pub fn remove(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}
