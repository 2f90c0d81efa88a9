//! Per-root index facade
//!
//! Wires one [`ManifestStore`] and one [`IndexBuilder`] around a shared
//! [`RootLock`] and exposes the update and rebuild entry points.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use prism_schema::{ContentHash, Manifest, PackageEntry};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::builder::{IndexBuilder, file_name};
use crate::config::IndexConfig;
use crate::error::IndexError;
use crate::events::{PackageAdded, PackageSink};
use crate::inspect::InspectOutcome;
use crate::manifest::{ManifestStore, RootLock};
use crate::pool::TaskRunner;
use crate::render::Renderer;

/// Summary of a full rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub projects: usize,
    pub packages: usize,
    pub added: Vec<PackageAdded>,
    pub pruned: Vec<String>,
}

#[derive(Debug)]
pub struct PackageIndex {
    config: IndexConfig,
    root: PathBuf,
    store: ManifestStore,
    builder: IndexBuilder,
}

impl PackageIndex {
    /// Open the index described by `config`, creating the root and the
    /// quarantine folder if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if no root is configured or the directories cannot
    /// be created.
    pub fn open(config: IndexConfig) -> Result<Self, IndexError> {
        let root = config.root()?.to_path_buf();
        fs::create_dir_all(&root)?;
        fs::create_dir_all(root.join(&config.error_folder))?;

        let lock = RootLock::new();
        let store = ManifestStore::new(root.join(&config.manifest_name), lock.clone());
        let builder = IndexBuilder::new(&root, &config, lock);
        debug!(root = %root.display(), pool = ?builder.runner().kind(), "Opened index");

        Ok(Self {
            config,
            root,
            store,
            builder,
        })
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.builder = self.builder.with_renderer(renderer);
        self
    }

    pub fn with_runner(mut self, runner: TaskRunner) -> Self {
        self.builder = self.builder.with_runner(runner);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn store(&self) -> &ManifestStore {
        &self.store
    }

    pub fn builder(&self) -> &IndexBuilder {
        &self.builder
    }

    /// Index archives not yet in the manifest.
    ///
    /// Known hashes are not re-inspected. New entries are persisted first
    /// and announced to `sink` one event each, then the affected leaves and
    /// the home page are regenerated.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest or any artifact cannot be written.
    /// Individual bad archives are quarantined, not reported here.
    pub async fn update(&self, sink: &dyn PackageSink) -> Result<Vec<PackageAdded>, IndexError> {
        let started = Instant::now();
        let archives = self.builder.archives()?;
        let known: BTreeSet<ContentHash> = self.store.snapshot().hashes().cloned().collect();

        let inspected = self.builder.inspect_all(archives, &known).await;
        let now = chrono::Utc::now().timestamp();
        let candidates: Vec<_> = inspected
            .iter()
            .filter_map(|item| match &item.outcome {
                InspectOutcome::Extracted { meta } => Some((
                    item.hash.clone(),
                    Some(PackageEntry::new(meta.clone(), item.file_name(), now)),
                )),
                InspectOutcome::Known | InspectOutcome::Quarantined => None,
            })
            .collect();

        let added = self.store.upsert(candidates)?;
        let events = self.notify(added.iter().map(|(_, e)| e), sink);

        let projects: BTreeSet<&str> = added.iter().map(|(_, e)| e.name.as_str()).collect();
        for project in &projects {
            self.builder.regenerate_leaf(project).await?;
        }
        if !added.is_empty() || !self.builder.home_path().exists() {
            let groups = self.builder.scan_projects().await?;
            self.builder.write_home(&groups)?;
        }

        info!(
            added = events.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Update finished"
        );
        Ok(events)
    }

    /// Re-scan and re-inspect every archive, then rewrite the manifest and
    /// all artifacts.
    ///
    /// Entries whose hash and file are still present are kept as they are;
    /// everything else is dropped by omission. `cancel` is only checked
    /// between writes, so an interrupted rebuild leaves each artifact
    /// either in its old or its new state.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Interrupted`] when cancelled, or an error if
    /// the manifest or an artifact cannot be written.
    pub async fn rebuild(
        &self,
        sink: &dyn PackageSink,
        cancel: &CancellationToken,
    ) -> Result<RebuildReport, IndexError> {
        let started = Instant::now();
        checkpoint(cancel)?;

        let previous = self.store.snapshot();
        let archives = self.builder.archives()?;
        let inspected = self.builder.inspect_all(archives, &BTreeSet::new()).await;

        let manifest = merge_manifest(&previous, &inspected);
        checkpoint(cancel)?;
        self.store.replace(&manifest)?;
        info!(
            packages = manifest.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Rebuilt manifest"
        );

        let added = self.notify(
            manifest
                .iter()
                .filter(|(hash, _)| !previous.contains(hash))
                .map(|(_, e)| e),
            sink,
        );

        let groups = IndexBuilder::group(&inspected);
        checkpoint(cancel)?;
        self.builder.write_home(&groups)?;

        let leaves_started = Instant::now();
        for group in &groups {
            checkpoint(cancel)?;
            self.builder.write_leaf(group)?;
        }
        info!(
            leaves = groups.len(),
            elapsed_ms = leaves_started.elapsed().as_millis() as u64,
            "Regenerated leaves"
        );

        checkpoint(cancel)?;
        let keep: BTreeSet<String> = groups.iter().map(|g| g.name.clone()).collect();
        let pruned = self.builder.prune_leaves(&keep)?;

        info!(
            projects = groups.len(),
            packages = manifest.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Rebuild finished"
        );
        Ok(RebuildReport {
            projects: groups.len(),
            packages: manifest.len(),
            added,
            pruned,
        })
    }

    fn notify<'a>(
        &self,
        entries: impl Iterator<Item = &'a PackageEntry>,
        sink: &dyn PackageSink,
    ) -> Vec<PackageAdded> {
        entries
            .map(|entry| {
                let event = PackageAdded {
                    name: entry.name.clone(),
                    version: entry.version.clone(),
                    path: self.root.join(&entry.filename),
                };
                info!(name = %event.name, version = %event.version, "Package added");
                sink.package_added(&event);
                event
            })
            .collect()
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), IndexError> {
    if cancel.is_cancelled() {
        return Err(IndexError::Interrupted);
    }
    Ok(())
}

/// Build the manifest for a full rebuild.
///
/// An entry survives unchanged when its hash was re-seen under the same
/// file name. Other extracted archives get fresh entries, keeping the
/// original `added` time when only the file name changed.
fn merge_manifest(previous: &Manifest, inspected: &[crate::inspect::Inspected]) -> Manifest {
    let now = chrono::Utc::now().timestamp();
    let live: BTreeMap<String, &ContentHash> = inspected
        .iter()
        .filter(|item| item.meta().is_some())
        .map(|item| (item.file_name(), &item.hash))
        .collect();

    let mut manifest = Manifest::new();
    for (hash, entry) in previous {
        if live.get(&entry.filename).is_some_and(|h| *h == hash) {
            manifest.insert_new(hash.clone(), entry.clone());
        }
    }
    for item in inspected {
        let Some(meta) = item.meta() else { continue };
        let added = previous.get(&item.hash).map_or(now, |e| e.added);
        manifest.insert_new(
            item.hash.clone(),
            PackageEntry::new(meta.clone(), file_name(&item.path), added),
        );
    }
    manifest
}
