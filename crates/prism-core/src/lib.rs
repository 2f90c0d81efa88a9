//! prism-core: the index engine
//!
//! Inspects package archives under an index root, deduplicates them by
//! content hash into a persisted manifest, and writes per-project (leaf)
//! and aggregate (home) listings. A background watcher repairs the
//! listings when the directory drifts away from them.
//!
//! # Layout
//!
//! ```text
//! <root>/
//! ├── demo-1.0.tar.gz      # archives, directly under the root
//! ├── index.json           # manifest: hash -> entry
//! ├── index.html           # home listing
//! ├── demo/index.json      # leaf listing
//! ├── demo/index.html
//! └── _errors/             # quarantined archives
//! ```

pub mod builder;
pub mod config;
pub mod error;
pub mod events;
pub mod index;
pub mod inspect;
pub mod io;
pub mod manifest;
pub mod pool;
pub mod render;
pub mod sync;
pub mod watcher;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use builder::{IndexBuilder, ProjectGroup};
pub use config::{ConfigError, IndexConfig, PoolConfig, SyncConfig, WatchConfig};
pub use error::{IndexError, InspectError, ManifestError};
pub use events::{ChannelSink, NullSink, PackageAdded, PackageSink};
pub use index::{PackageIndex, RebuildReport};
pub use inspect::{Inspector, Quarantine};
pub use manifest::{ManifestStore, RootLock};
pub use pool::{PoolKind, Task, TaskError, TaskRunner};
pub use render::{Renderer, Template, TemplateHtml};
pub use sync::SyncReport;
pub use watcher::{ConsistencyWatcher, Drift, WatchState, WatcherHandle};
pub use worker::run_worker;
