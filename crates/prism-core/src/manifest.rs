//! Manifest persistence
//!
//! The manifest (`<root>/index.json` by default) maps content hash to
//! [`PackageEntry`]. Every read-modify-write runs under the root's
//! [`RootLock`]; the lock is never held while archives are inspected.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use prism_schema::{ContentHash, Manifest, PackageEntry};
use tracing::{debug, warn};

use crate::error::ManifestError;
use crate::io::write_atomic;

/// Exclusive lock for one index root.
///
/// Clones share the same mutex; separate roots get separate locks.
#[derive(Debug, Clone, Default)]
pub struct RootLock(Arc<Mutex<()>>);

impl RootLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// Returns [`ManifestError::LockPoisoned`] if a previous holder panicked.
    pub fn acquire(&self) -> Result<MutexGuard<'_, ()>, ManifestError> {
        self.0
            .lock()
            .map_err(|e| ManifestError::LockPoisoned(e.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
    lock: RootLock,
}

impl ManifestStore {
    pub fn new(path: impl Into<PathBuf>, lock: RootLock) -> Self {
        Self {
            path: path.into(),
            lock,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the manifest, reinitializing it on disk if missing or malformed.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned or the empty manifest
    /// cannot be written.
    pub fn load(&self) -> Result<Manifest, ManifestError> {
        let _guard = self.lock.acquire()?;
        self.load_locked()
    }

    /// Strict read that reports a missing or malformed file.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Unreadable`] when the file is missing or malformed.
    pub fn read(&self) -> Result<Manifest, ManifestError> {
        let bytes = fs::read(&self.path).map_err(|e| ManifestError::Unreadable {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        serde_json::from_slice(&bytes).map_err(|e| ManifestError::Unreadable {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    /// Lock-free best-effort read; an unreadable file yields an empty manifest.
    pub fn snapshot(&self) -> Manifest {
        self.read().unwrap_or_default()
    }

    /// Merge inspection results and return the entries that were actually added.
    ///
    /// Candidates without an entry (quarantined archives) and hashes already
    /// present are skipped. Load, merge and persist happen under one lock
    /// acquisition; nothing is written when no entry is new.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned or the manifest cannot be persisted.
    pub fn upsert<I>(&self, candidates: I) -> Result<Vec<(ContentHash, PackageEntry)>, ManifestError>
    where
        I: IntoIterator<Item = (ContentHash, Option<PackageEntry>)>,
    {
        let _guard = self.lock.acquire()?;
        let mut manifest = self.load_locked()?;

        let mut added = Vec::new();
        for (hash, entry) in candidates {
            let Some(entry) = entry else { continue };
            if manifest.insert_new(hash.clone(), entry.clone()) {
                added.push((hash, entry));
            }
        }

        if !added.is_empty() {
            self.persist(&manifest)?;
        }
        debug!(added = added.len(), total = manifest.len(), "Manifest upsert");
        Ok(added)
    }

    /// Overwrite the whole manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned or the write fails.
    pub fn replace(&self, manifest: &Manifest) -> Result<(), ManifestError> {
        let _guard = self.lock.acquire()?;
        self.persist(manifest)
    }

    fn load_locked(&self) -> Result<Manifest, ManifestError> {
        match self.read() {
            Ok(manifest) => Ok(manifest),
            Err(ManifestError::Unreadable { reason, .. }) => {
                let missing = !self.path.exists();
                if missing {
                    debug!(path = %self.path.display(), "No manifest yet, initializing");
                } else {
                    warn!(path = %self.path.display(), %reason, "Manifest unreadable, reinitializing");
                }
                let manifest = Manifest::new();
                self.persist(&manifest)?;
                Ok(manifest)
            }
            Err(e) => Err(e),
        }
    }

    fn persist(&self, manifest: &Manifest) -> Result<(), ManifestError> {
        let mut json = serde_json::to_vec_pretty(manifest)?;
        json.push(b'\n');
        write_atomic(&self.path, &json)?;
        Ok(())
    }
}
