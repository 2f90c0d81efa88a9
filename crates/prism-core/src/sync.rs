//! Import archives from an external download cache.
//!
//! pip's download cache stores each archive under its URL-encoded source
//! URL; the archive name is whatever follows the last `%2F`.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use prism_schema::ContentHash;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::IndexError;
use crate::events::{PackageAdded, PackageSink};
use crate::index::PackageIndex;
use crate::inspect::{HashTask, is_archive};
use crate::pool::TaskRunner;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Archives copied into the index root.
    pub copied: Vec<PathBuf>,
    /// Packages the follow-up update added to the manifest.
    pub added: Vec<PackageAdded>,
}

/// Archive name for a cache file name: the part after the last `%2F`.
pub fn cache_target_name(file_name: &str) -> &str {
    file_name.rsplit("%2F").next().unwrap_or(file_name)
}

/// Copy archives from `source` into `dest` unless their content is already there.
///
/// Returns the paths of the copied files.
///
/// # Errors
///
/// Returns [`IndexError::SyncSourceMissing`] if `source` is not a directory,
/// or an I/O error if either directory cannot be listed or a copy fails.
pub async fn sync_folder(
    source: &Path,
    dest: &Path,
    runner: &TaskRunner,
) -> Result<Vec<PathBuf>, IndexError> {
    if !source.is_dir() {
        return Err(IndexError::SyncSourceMissing(source.to_path_buf()));
    }
    let started = Instant::now();

    let incoming = list_files(source, |name| is_archive(Path::new(cache_target_name(name))))?;
    let current = list_files(dest, |name| is_archive(Path::new(name)))?;

    let present: BTreeSet<ContentHash> = hash_all(runner, current)
        .await
        .into_iter()
        .map(|(_, hash)| hash)
        .collect();

    let mut incoming = hash_all(runner, incoming).await;
    incoming.sort();

    let mut seen = present;
    let mut copied = Vec::new();
    for (path, hash) in incoming {
        if !seen.insert(hash) {
            continue;
        }
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let target = dest.join(cache_target_name(&name));
        if target.exists() {
            warn!(
                source = %path.display(),
                target = %target.display(),
                "Target exists with different content, not overwriting"
            );
            continue;
        }
        fs::copy(&path, &target)?;
        debug!(source = %path.display(), target = %target.display(), "Copied archive");
        copied.push(target);
    }

    info!(
        copied = copied.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Synced folder"
    );
    Ok(copied)
}

fn list_files(dir: &Path, keep: impl Fn(&str) -> bool) -> Result<Vec<PathBuf>, IndexError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_file() && keep(&entry.file_name().to_string_lossy()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

async fn hash_all(runner: &TaskRunner, paths: Vec<PathBuf>) -> Vec<(PathBuf, ContentHash)> {
    let tasks: Vec<HashTask> = paths.into_iter().map(|path| HashTask { path }).collect();
    runner
        .run(tasks)
        .await
        .into_iter()
        .filter_map(|done| match done.result {
            Ok(hashed) => Some(hashed),
            Err(e) => {
                warn!(error = %e, "Could not hash file");
                None
            }
        })
        .collect()
}

impl PackageIndex {
    /// Directory sync: pull new archives from `source` (or the configured
    /// cache) into the root, then run [`PackageIndex::update`].
    ///
    /// # Errors
    ///
    /// Returns an error if no source is configured, the source is missing,
    /// a copy fails, or the update fails.
    pub async fn sync(
        &self,
        source: Option<&Path>,
        sink: &dyn PackageSink,
    ) -> Result<SyncReport, IndexError> {
        let source = match source {
            Some(dir) => dir.to_path_buf(),
            None => self
                .config()
                .sync
                .source()
                .ok_or(IndexError::SyncSourceUnset)?,
        };
        let copied = sync_folder(&source, self.root(), self.builder().runner()).await?;
        let added = self.update(sink).await?;
        Ok(SyncReport { copied, added })
    }
}
