//! Leaf and home artifact generation
//!
//! Project groupings are always derived from a live scan of the root plus
//! inspection, never from the manifest, so listings stay correct when the
//! manifest is stale. Artifact writes take the root lock and go through
//! [`write_atomic`].

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use prism_schema::{ContentHash, LeafRecord, PackageMeta};
use serde_json::json;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::IndexConfig;
use crate::error::IndexError;
use crate::inspect::{HashTask, InspectOutcome, InspectTask, Inspected, is_archive};
use crate::io::{stat, write_atomic};
use crate::manifest::RootLock;
use crate::pool::TaskRunner;
use crate::render::{Renderer, Template, TemplateHtml};

const LEAF_JSON: &str = "index.json";
const HTML: &str = "index.html";

/// All archives of one project, sorted by file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectGroup {
    pub name: String,
    pub versions: Vec<(PackageMeta, PathBuf)>,
}

/// Case-insensitive project key with `_` folded to `-`.
pub fn normalize(name: &str) -> String {
    name.to_ascii_lowercase().replace('_', "-")
}

pub struct IndexBuilder {
    root: PathBuf,
    manifest_name: String,
    error_folder: String,
    urlbase: String,
    archive_urlbase: String,
    title: String,
    description: String,
    lock: RootLock,
    runner: TaskRunner,
    renderer: Arc<dyn Renderer>,
}

impl std::fmt::Debug for IndexBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexBuilder")
            .field("root", &self.root)
            .field("runner", &self.runner)
            .finish_non_exhaustive()
    }
}

impl IndexBuilder {
    pub fn new(root: impl Into<PathBuf>, config: &IndexConfig, lock: RootLock) -> Self {
        Self {
            root: root.into(),
            manifest_name: config.manifest_name.clone(),
            error_folder: config.error_folder.clone(),
            urlbase: config.urlbase.trim_end_matches('/').to_string(),
            archive_urlbase: config.archive_urlbase.trim_end_matches('/').to_string(),
            title: config.title.clone(),
            description: config.description.clone(),
            lock,
            runner: TaskRunner::from_config(&config.pool),
            renderer: Arc::new(TemplateHtml::new()),
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_runner(mut self, runner: TaskRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn runner(&self) -> &TaskRunner {
        &self.runner
    }

    pub fn error_dir(&self) -> PathBuf {
        self.root.join(&self.error_folder)
    }

    pub fn home_path(&self) -> PathBuf {
        self.root.join(HTML)
    }

    pub fn leaf_dir(&self, project: &str) -> PathBuf {
        self.root.join(project)
    }

    /// Recognized archives directly under the root, sorted by file name.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the root cannot be listed.
    pub fn archives(&self) -> Result<Vec<PathBuf>, IndexError> {
        let mut archives = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1) {
            let entry = entry.map_err(std::io::Error::from)?;
            if entry.file_type().is_file() && is_archive(entry.path()) {
                archives.push(entry.into_path());
            }
        }
        archives.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(archives)
    }

    /// Inspect `paths` through the pool, quarantining failures.
    ///
    /// When `known` is non-empty the archives are hashed first and only
    /// unknown hashes are extracted; the rest come back as
    /// [`InspectOutcome::Known`]. Per-item failures are logged and dropped;
    /// results are sorted by path.
    pub async fn inspect_all(
        &self,
        paths: Vec<PathBuf>,
        known: &BTreeSet<ContentHash>,
    ) -> Vec<Inspected> {
        let quarantine = Some(self.error_dir());
        let reserved = self.reserved_names();
        let task = |path: PathBuf| {
            InspectTask::new(path, quarantine.clone()).with_reserved(reserved.clone())
        };

        let mut inspected = Vec::with_capacity(paths.len());
        let tasks: Vec<InspectTask> = if known.is_empty() {
            paths.into_iter().map(task).collect()
        } else {
            let hashes: Vec<HashTask> = paths.into_iter().map(|path| HashTask { path }).collect();
            let mut unknown = Vec::new();
            for done in self.runner.run(hashes).await {
                match done.result {
                    Ok((path, hash)) if known.contains(&hash) => inspected.push(Inspected {
                        path,
                        hash,
                        outcome: InspectOutcome::Known,
                    }),
                    Ok((path, hash)) => unknown.push(task(path).with_hash(hash)),
                    Err(e) => warn!(error = %e, "Skipping archive"),
                }
            }
            unknown
        };

        let task_paths: Vec<PathBuf> = tasks.iter().map(|t| t.path.clone()).collect();
        for done in self.runner.run(tasks).await {
            match done.result {
                Ok(item) => inspected.push(item),
                Err(e) => {
                    warn!(path = %task_paths[done.index].display(), error = %e, "Skipping archive");
                }
            }
        }
        inspected.sort_by(|a, b| a.path.cmp(&b.path));
        inspected
    }

    /// Group extracted archives by project name, sorted by name.
    pub fn group(inspected: &[Inspected]) -> Vec<ProjectGroup> {
        let mut groups: BTreeMap<&str, Vec<(PackageMeta, PathBuf)>> = BTreeMap::new();
        for item in inspected {
            if let Some(meta) = item.meta() {
                groups
                    .entry(meta.name.as_str())
                    .or_default()
                    .push((meta.clone(), item.path.clone()));
            }
        }
        groups
            .into_iter()
            .map(|(name, mut versions)| {
                versions.sort_by(|a, b| a.1.file_name().cmp(&b.1.file_name()));
                ProjectGroup {
                    name: name.to_string(),
                    versions,
                }
            })
            .collect()
    }

    /// Scan the root and group every readable archive by project.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be listed.
    pub async fn scan_projects(&self) -> Result<Vec<ProjectGroup>, IndexError> {
        let started = Instant::now();
        let archives = self.archives()?;
        let inspected = self.inspect_all(archives, &BTreeSet::new()).await;
        let groups = Self::group(&inspected);
        info!(
            projects = groups.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Collected projects"
        );
        Ok(groups)
    }

    /// Re-derive and rewrite the leaf of one project from the filesystem.
    ///
    /// Candidates are archives named `<project>-*`; only those whose
    /// extracted name equals `project` are listed. Returns `None` (and
    /// writes nothing) when the project has no archives left.
    ///
    /// # Errors
    ///
    /// Returns an error if the project name is not a valid directory name
    /// or the leaf cannot be written.
    pub async fn regenerate_leaf(&self, project: &str) -> Result<Option<ProjectGroup>, IndexError> {
        self.validate_project(project)?;
        let prefix = format!("{}-", normalize(project));
        let pattern = format!(
            "{}/*-*.*",
            glob::Pattern::escape(&self.root.to_string_lossy())
        );

        let candidates: Vec<PathBuf> = glob::glob(&pattern)?
            .filter_map(Result::ok)
            .filter(|p| p.is_file() && is_archive(p))
            .filter(|p| {
                p.file_name()
                    .is_some_and(|n| normalize(&n.to_string_lossy()).starts_with(&prefix))
            })
            .collect();

        let inspected = self.inspect_all(candidates, &BTreeSet::new()).await;
        let group = Self::group(&inspected)
            .into_iter()
            .find(|g| g.name == project);

        if let Some(group) = &group {
            self.write_leaf(group)?;
        } else {
            debug!(project, "No archives left for project");
        }
        Ok(group)
    }

    /// Overwrite `<root>/<project>/index.{json,html}` from `group`.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid project names, unstattable archives,
    /// render failures or write failures.
    pub fn write_leaf(&self, group: &ProjectGroup) -> Result<(), IndexError> {
        self.validate_project(&group.name)?;

        let mut records = Vec::with_capacity(group.versions.len());
        for (meta, path) in &group.versions {
            let st = stat(path)?;
            records.push(LeafRecord {
                filename: file_name(path),
                name: meta.name.clone(),
                version: meta.version.clone(),
                mtime: st.mtime,
                ctime: st.ctime,
                atime: st.atime,
                size: Some(st.size),
            });
        }
        records.sort_by(|a, b| a.filename.cmp(&b.filename));

        let versions: Vec<_> = records
            .iter()
            .map(|r| {
                let mut row = json!(r);
                row["url"] = json!(format!("{}/{}", self.archive_urlbase, r.filename));
                row
            })
            .collect();
        let html = self.renderer.render(
            Template::Leaf,
            &json!({
                "title": self.title,
                "package_title": group.name,
                "versions": versions,
            }),
        )?;
        let mut listing = serde_json::to_vec_pretty(&records)?;
        listing.push(b'\n');

        let dir = self.leaf_dir(&group.name);
        let _guard = self.lock.acquire()?;
        write_atomic(&dir.join(LEAF_JSON), &listing)?;
        write_atomic(&dir.join(HTML), html.as_bytes())?;
        debug!(project = %group.name, versions = records.len(), "Wrote leaf");
        Ok(())
    }

    /// Overwrite `<root>/index.html` from the full project list.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering or writing fails.
    pub fn write_home(&self, groups: &[ProjectGroup]) -> Result<(), IndexError> {
        let started = Instant::now();
        let packages: Vec<_> = groups
            .iter()
            .map(|g| json!({"name": g.name, "url": format!("{}/{}", self.urlbase, g.name)}))
            .collect();
        let html = self.renderer.render(
            Template::Home,
            &json!({
                "title": self.title,
                "description": self.description,
                "packages": packages,
            }),
        )?;

        let _guard = self.lock.acquire()?;
        write_atomic(&self.home_path(), html.as_bytes())?;
        info!(
            projects = groups.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Wrote home"
        );
        Ok(())
    }

    /// Project directories under the root that hold a leaf listing.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the root cannot be listed.
    pub fn leaf_projects(&self) -> Result<Vec<String>, IndexError> {
        let mut projects = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1) {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name != self.error_folder && entry.path().join(LEAF_JSON).is_file() {
                projects.push(name);
            }
        }
        projects.sort();
        Ok(projects)
    }

    /// # Errors
    ///
    /// Returns an error if the listing is missing or malformed.
    pub fn read_leaf(&self, project: &str) -> Result<Vec<LeafRecord>, IndexError> {
        let bytes = fs::read(self.leaf_dir(project).join(LEAF_JSON))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Remove the leaf artifacts of every project not in `keep`.
    ///
    /// Only the generated files are deleted; the directory goes too if
    /// nothing else is left in it. Returns the pruned project names.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be listed or a leaf cannot be removed.
    pub fn prune_leaves(&self, keep: &BTreeSet<String>) -> Result<Vec<String>, IndexError> {
        let stale: Vec<String> = self
            .leaf_projects()?
            .into_iter()
            .filter(|p| !keep.contains(p))
            .collect();

        let _guard = self.lock.acquire()?;
        for project in &stale {
            let dir = self.leaf_dir(project);
            for artifact in [LEAF_JSON, HTML] {
                match fs::remove_file(dir.join(artifact)) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
            // Leave directories that hold anything we did not write.
            let _ = fs::remove_dir(&dir);
            info!(project, "Pruned leaf of vanished project");
        }
        Ok(stale)
    }

    /// Names under the root that belong to the index itself.
    fn reserved_names(&self) -> Vec<String> {
        let mut names: Vec<String> = [
            self.error_folder.as_str(),
            self.manifest_name.as_str(),
            LEAF_JSON,
            HTML,
        ]
        .iter()
        .map(ToString::to_string)
        .collect();
        names.sort();
        names.dedup();
        names
    }

    fn validate_project(&self, project: &str) -> Result<(), IndexError> {
        if matches!(project, "" | "." | "..")
            || project.contains(['/', '\\'])
            || self.reserved_names().iter().any(|r| r == project)
        {
            return Err(IndexError::InvalidProjectName(project.to_string()));
        }
        Ok(())
    }
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
