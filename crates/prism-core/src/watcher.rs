//! Background consistency watcher
//!
//! Periodically compares the recorded listings with the archives actually
//! present under the root and runs a full rebuild when they diverge.
//!
//! ```text
//! Idle -> Checking -> Idle
//!                  \-> Repairing -> Idle
//! (stop) -> Stopped
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use prism_schema::Signature;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::builder::file_name;
use crate::config::WatchConfig;
use crate::error::IndexError;
use crate::events::PackageSink;
use crate::index::PackageIndex;
use crate::io::stat;
use crate::pool::TaskError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Checking,
    Repairing,
    Stopped,
}

/// Divergence between recorded listings and the filesystem.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Drift {
    /// Archives on disk that no listing records.
    pub added: Vec<String>,
    /// Recorded archives that are gone.
    pub removed: Vec<String>,
    /// Archives whose size or mtime changed.
    pub changed: Vec<String>,
    /// Listings that could not be read.
    pub unreadable: Vec<String>,
}

impl Drift {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.changed.is_empty()
            && self.unreadable.is_empty()
    }
}

impl std::fmt::Display for Drift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} added, {} removed, {} changed, {} unreadable",
            self.added.len(),
            self.removed.len(),
            self.changed.len(),
            self.unreadable.len()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Consistent,
    Repaired(Drift),
}

/// Compare recorded signatures against a fresh stat of the root.
///
/// Recorded state is the union of all leaf listings plus the file names in
/// the manifest. Signatures are (size, mtime seconds); rows without a
/// recorded size only count for presence.
///
/// # Errors
///
/// Returns an error if the root itself cannot be listed.
pub fn check_consistency(index: &PackageIndex) -> Result<Option<Drift>, IndexError> {
    let builder = index.builder();
    let mut drift = Drift::default();

    let mut live: BTreeMap<String, Signature> = BTreeMap::new();
    for path in builder.archives()? {
        match stat(&path) {
            Ok(st) => {
                live.insert(file_name(&path), st.signature());
            }
            // Raced with a delete; the next cycle sees the final state.
            Err(e) => debug!(path = %path.display(), error = %e, "Archive vanished during check"),
        }
    }

    let mut recorded: BTreeMap<String, Option<Signature>> = BTreeMap::new();
    for project in builder.leaf_projects()? {
        match builder.read_leaf(&project) {
            Ok(records) => {
                for record in records {
                    recorded.insert(record.filename.clone(), record.signature());
                }
            }
            Err(e) => {
                debug!(project, error = %e, "Unreadable leaf");
                drift.unreadable.push(format!("{project}/index.json"));
            }
        }
    }

    let mut manifest_files = BTreeSet::new();
    match index.store().read() {
        Ok(manifest) => {
            manifest_files.extend(manifest.iter().map(|(_, e)| e.filename.clone()));
        }
        Err(e) => {
            debug!(error = %e, "Unreadable manifest");
            drift.unreadable.push(index.config().manifest_name.clone());
        }
    }
    if !builder.home_path().exists() {
        drift.unreadable.push(file_name(&builder.home_path()));
    }

    for (name, signature) in &live {
        match recorded.get(name) {
            None => drift.added.push(name.clone()),
            Some(Some(seen)) if seen != signature => drift.changed.push(name.clone()),
            Some(_) => {}
        }
    }
    drift.removed = recorded
        .keys()
        .chain(manifest_files.iter())
        .filter(|name| !live.contains_key(*name))
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    Ok((!drift.is_empty()).then_some(drift))
}

pub struct ConsistencyWatcher {
    index: Arc<PackageIndex>,
    sink: Arc<dyn PackageSink>,
    config: WatchConfig,
    cancel: CancellationToken,
    state: watch::Sender<WatchState>,
}

impl std::fmt::Debug for ConsistencyWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsistencyWatcher")
            .field("root", &self.index.root())
            .field("config", &self.config)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl ConsistencyWatcher {
    pub fn new(index: Arc<PackageIndex>, sink: Arc<dyn PackageSink>) -> Self {
        let config = index.config().watch.clone();
        let (state, _) = watch::channel(WatchState::Idle);
        Self {
            index,
            sink,
            config,
            cancel: CancellationToken::new(),
            state,
        }
    }

    pub fn with_config(mut self, config: WatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Stop when `cancel` fires, e.g. a process-wide shutdown token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WatchState> {
        self.state.subscribe()
    }

    /// One check, plus a rebuild if drift was found.
    ///
    /// # Errors
    ///
    /// Returns the check or rebuild error, including
    /// [`IndexError::Interrupted`] when stopped mid-rebuild.
    pub async fn cycle(&self) -> Result<CycleOutcome, IndexError> {
        self.state.send_replace(WatchState::Checking);
        let index = self.index.clone();
        let checked = tokio::task::spawn_blocking(move || check_consistency(&index))
            .await
            .map_err(|e| IndexError::Task(TaskError::Panicked(e.to_string())));

        let drift = match checked {
            Ok(Ok(Some(drift))) => drift,
            Ok(Ok(None)) => {
                self.state.send_replace(WatchState::Idle);
                return Ok(CycleOutcome::Consistent);
            }
            Ok(Err(e)) | Err(e) => {
                self.state.send_replace(WatchState::Idle);
                return Err(e);
            }
        };

        info!(root = %self.index.root().display(), %drift, "Drift detected, rebuilding");
        self.state.send_replace(WatchState::Repairing);
        let rebuilt = self.index.rebuild(&self.sink, &self.cancel).await;
        self.state.send_replace(WatchState::Idle);
        rebuilt?;
        Ok(CycleOutcome::Repaired(drift))
    }

    /// Loop until cancelled. Ordinary errors are logged and retried after
    /// the failure back-off.
    pub async fn run(self) {
        info!(
            root = %self.index.root().display(),
            interval_secs = self.config.interval_secs,
            "Consistency watcher started"
        );

        if self.sleep(self.config.startup_delay()).await {
            loop {
                match self.cycle().await {
                    Ok(CycleOutcome::Consistent) => debug!("Index consistent"),
                    Ok(CycleOutcome::Repaired(drift)) => info!(%drift, "Index repaired"),
                    Err(e) if e.is_interrupted() => break,
                    Err(e) => {
                        error!(error = %e, "Consistency check failed");
                        if !self.sleep(self.config.failure_backoff()).await {
                            break;
                        }
                    }
                }
                if !self.sleep(self.config.interval()).await {
                    break;
                }
            }
        }

        self.state.send_replace(WatchState::Stopped);
        info!("Consistency watcher stopped");
    }

    /// Run on the current runtime.
    pub fn spawn(self) -> WatcherHandle {
        let cancel = self.cancel.clone();
        let state = self.subscribe();
        let task = tokio::spawn(self.run());
        WatcherHandle {
            cancel,
            state,
            task,
        }
    }

    /// Sleep unless cancelled first. Returns `false` on cancellation.
    async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(duration) => true,
        }
    }
}

#[derive(Debug)]
pub struct WatcherHandle {
    cancel: CancellationToken,
    state: watch::Receiver<WatchState>,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    pub fn state(&self) -> WatchState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<WatchState> {
        self.state.clone()
    }

    /// Request a stop and wait for the loop to finish its current write.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Watcher task ended abnormally");
        }
    }
}
