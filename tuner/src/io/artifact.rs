//! The configuration artifact and its scoped backup.
//!
//! [`ConfigArtifact::backup`] copies the pristine bytes aside (`<artifact>.bak`) and hands out
//! an [`ArtifactLease`]. The lease is the only way to mutate the artifact and it restores the
//! pristine bytes when released, either explicitly via [`ArtifactLease::restore`] or on drop.
//! Because `backup` borrows the artifact mutably, at most one lease exists at a time.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::core::anchor::substitute_all;
use crate::core::space::{Assignment, SearchSpace};

/// Hex SHA-256 of `bytes`.
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[derive(Debug)]
pub struct ConfigArtifact {
    path: PathBuf,
    backup_path: PathBuf,
}

impl ConfigArtifact {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            backup_path: sibling_with_suffix(path, ".bak"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    pub fn read(&self) -> Result<Vec<u8>> {
        fs::read(&self.path).with_context(|| format!("read artifact {}", self.path.display()))
    }

    /// Fingerprint of the artifact's current on-disk bytes.
    pub fn fingerprint(&self) -> Result<String> {
        Ok(fingerprint_bytes(&self.read()?))
    }

    /// Restore a backup left behind by an unclean shutdown.
    ///
    /// Returns `true` if a backup was found and put back in place.
    pub fn reconcile(&self) -> Result<bool> {
        if !self.backup_path.exists() {
            return Ok(false);
        }
        warn!(
            backup = %self.backup_path.display(),
            "found leftover backup from an interrupted trial, restoring artifact"
        );
        let pristine = fs::read(&self.backup_path)
            .with_context(|| format!("read backup {}", self.backup_path.display()))?;
        write_atomic(&self.path, &pristine)?;
        fs::remove_file(&self.backup_path)
            .with_context(|| format!("remove backup {}", self.backup_path.display()))?;
        info!(artifact = %self.path.display(), "artifact restored from backup");
        Ok(true)
    }

    /// Copy the pristine artifact aside and return the lease that owns mutation.
    ///
    /// Fails if the artifact is missing or a previous backup was never reconciled.
    pub fn backup(&mut self) -> Result<ArtifactLease<'_>> {
        if self.backup_path.exists() {
            bail!(
                "backup {} already exists; run `tuner restore` first",
                self.backup_path.display()
            );
        }
        let pristine = self.read()?;
        write_atomic(&self.backup_path, &pristine)?;
        debug!(backup = %self.backup_path.display(), bytes = pristine.len(), "artifact backed up");
        Ok(ArtifactLease {
            artifact: self,
            pristine,
            released: false,
        })
    }
}

/// Exclusive, scoped permission to mutate the artifact for one trial.
#[derive(Debug)]
pub struct ArtifactLease<'a> {
    artifact: &'a ConfigArtifact,
    pristine: Vec<u8>,
    released: bool,
}

impl ArtifactLease<'_> {
    pub fn pristine(&self) -> &[u8] {
        &self.pristine
    }

    /// Rewrite the artifact for `assignment`, starting from the pristine text.
    pub fn apply(&self, space: &SearchSpace, assignment: &Assignment) -> Result<()> {
        let text = std::str::from_utf8(&self.pristine).with_context(|| {
            format!("artifact {} is not UTF-8", self.artifact.path.display())
        })?;
        let literals = space.render(assignment)?;
        let mutated = substitute_all(text, &literals)?;
        write_atomic(&self.artifact.path, mutated.as_bytes())?;
        debug!(params = literals.len(), "assignment applied");
        Ok(())
    }

    /// Put the pristine bytes back and drop the backup.
    pub fn restore(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        let path = &self.artifact.path;
        write_atomic(path, &self.pristine)?;
        let on_disk = fs::read(path).with_context(|| format!("verify {}", path.display()))?;
        if on_disk != self.pristine {
            bail!("artifact {} does not match its pristine bytes after restore", path.display());
        }
        let backup = &self.artifact.backup_path;
        fs::remove_file(backup).with_context(|| format!("remove backup {}", backup.display()))?;
        self.released = true;
        debug!(artifact = %path.display(), "artifact restored");
        Ok(())
    }
}

impl Drop for ArtifactLease<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            error!(err = %format!("{err:#}"), "failed to restore artifact");
        }
    }
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Replace `path` via temp file + rename, keeping the original permissions.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp_path = sibling_with_suffix(path, ".tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(&tmp_path, meta.permissions())
            .with_context(|| format!("copy permissions to {}", tmp_path.display()))?;
    }
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
