//! Index configuration
//!
//! Loaded from an optional TOML file, then overridden by `PRISM_*`
//! environment variables. Every field has a default so an empty file (or
//! no file) plus a root directory is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pool::PoolKind;

/// Environment variable naming pip's download cache, the default sync source.
pub const PIP_DOWNLOAD_CACHE: &str = "PIP_DOWNLOAD_CACHE";

const DEFAULT_THREAD_WORKERS: usize = 10;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: '{value}'")]
    InvalidEnv { key: &'static str, value: String },

    #[error("No index root configured; pass --root or set PRISM_ROOT")]
    MissingRoot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Directory holding the archives and every derived artifact.
    pub root: Option<PathBuf>,
    pub manifest_name: String,
    pub error_folder: String,
    /// Prefix for project links on the home page.
    pub urlbase: String,
    /// Prefix for archive links on leaf pages, relative to the leaf.
    pub archive_urlbase: String,
    pub title: String,
    pub description: String,
    pub pool: PoolConfig,
    pub watch: WatchConfig,
    pub sync: SyncConfig,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            root: None,
            manifest_name: "index.json".to_string(),
            error_folder: "_errors".to_string(),
            urlbase: String::new(),
            archive_urlbase: "..".to_string(),
            title: "Prism".to_string(),
            description: "Private package index".to_string(),
            pool: PoolConfig::default(),
            watch: WatchConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl IndexConfig {
    /// Configuration for `root` with every other field defaulted.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            ..Self::default()
        }
    }

    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// # Errors
    ///
    /// Returns the TOML error if `text` does not describe a configuration.
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Apply `PRISM_*` overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for values that do not parse.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides using an arbitrary lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for values that do not parse.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup("PRISM_ROOT") {
            self.root = Some(PathBuf::from(root));
        }
        if let Some(kind) = lookup("PRISM_POOL_KIND") {
            self.pool.kind = kind.parse().map_err(|_| ConfigError::InvalidEnv {
                key: "PRISM_POOL_KIND",
                value: kind,
            })?;
        }
        if let Some(workers) = lookup("PRISM_POOL_WORKERS") {
            self.pool.workers = workers.parse().map_err(|_| ConfigError::InvalidEnv {
                key: "PRISM_POOL_WORKERS",
                value: workers,
            })?;
        }
        if let Some(secs) = lookup("PRISM_WATCH_INTERVAL_SECS") {
            self.watch.interval_secs = secs.parse().map_err(|_| ConfigError::InvalidEnv {
                key: "PRISM_WATCH_INTERVAL_SECS",
                value: secs,
            })?;
        }
        if let Some(dir) = lookup("PRISM_SYNC_CACHE_DIR") {
            self.sync.cache_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::MissingRoot`] when no root was configured.
    pub fn root(&self) -> Result<&Path, ConfigError> {
        self.root.as_deref().ok_or(ConfigError::MissingRoot)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub kind: PoolKind,
    /// Zero or negative selects the default for `kind`.
    pub workers: i64,
    /// Executable run as `<program> worker <kind>` in process mode.
    pub program: Option<PathBuf>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            kind: PoolKind::Thread,
            workers: 0,
            program: None,
        }
    }
}

impl PoolConfig {
    /// Effective worker count: 10 threads, or one process per CPU.
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers as usize;
        }
        match self.kind {
            PoolKind::Thread => DEFAULT_THREAD_WORKERS,
            PoolKind::Process => num_cpus::get(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub startup_delay_secs: u64,
    pub interval_secs: u64,
    pub failure_backoff_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            startup_delay_secs: 10,
            interval_secs: 3,
            failure_backoff_secs: 3,
        }
    }
}

impl WatchConfig {
    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn failure_backoff(&self) -> Duration {
        Duration::from_secs(self.failure_backoff_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub cache_dir: Option<PathBuf>,
}

impl SyncConfig {
    /// Configured cache directory, falling back to `$PIP_DOWNLOAD_CACHE`.
    pub fn source(&self) -> Option<PathBuf> {
        self.source_with(|key| std::env::var(key).ok())
    }

    pub fn source_with<F>(&self, lookup: F) -> Option<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.cache_dir
            .clone()
            .or_else(|| lookup(PIP_DOWNLOAD_CACHE).filter(|v| !v.is_empty()).map(PathBuf::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = IndexConfig::parse("").unwrap();
        assert_eq!(config, IndexConfig::default());
        assert_eq!(config.manifest_name, "index.json");
        assert_eq!(config.archive_urlbase, "..");
        assert_eq!(config.watch.interval(), Duration::from_secs(3));
        assert!(matches!(config.root(), Err(ConfigError::MissingRoot)));
    }

    #[test]
    fn parses_sections() {
        let text = r#"
            root = "/srv/prism"
            title = "Internal"

            [pool]
            kind = "process"
            workers = 4

            [watch]
            interval_secs = 30
        "#;
        let config = IndexConfig::parse(text).unwrap();
        assert_eq!(config.root().unwrap(), Path::new("/srv/prism"));
        assert_eq!(config.title, "Internal");
        assert_eq!(config.pool.kind, PoolKind::Process);
        assert_eq!(config.pool.worker_count(), 4);
        assert_eq!(config.watch.interval_secs, 30);
        assert_eq!(config.watch.startup_delay_secs, 10);
    }

    #[test]
    fn non_positive_workers_use_kind_default() {
        let mut pool = PoolConfig {
            workers: -1,
            ..PoolConfig::default()
        };
        assert_eq!(pool.worker_count(), 10);
        pool.kind = PoolKind::Process;
        assert_eq!(pool.worker_count(), num_cpus::get());
    }

    #[test]
    fn env_overrides_file() {
        let mut config = IndexConfig::for_root("/from/file");
        config
            .apply_env_with(env(&[
                ("PRISM_ROOT", "/from/env"),
                ("PRISM_POOL_KIND", "process"),
                ("PRISM_POOL_WORKERS", "2"),
                ("PRISM_SYNC_CACHE_DIR", "/cache"),
            ]))
            .unwrap();
        assert_eq!(config.root().unwrap(), Path::new("/from/env"));
        assert_eq!(config.pool.kind, PoolKind::Process);
        assert_eq!(config.pool.workers, 2);
        assert_eq!(config.sync.cache_dir.as_deref(), Some(Path::new("/cache")));
    }

    #[test]
    fn invalid_env_value_is_reported() {
        let mut config = IndexConfig::default();
        let err = config
            .apply_env_with(env(&[("PRISM_POOL_WORKERS", "many")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidEnv {
                key: "PRISM_POOL_WORKERS",
                ..
            }
        ));
    }

    #[test]
    fn sync_source_falls_back_to_pip_cache() {
        let sync = SyncConfig::default();
        assert_eq!(sync.source_with(env(&[])), None);
        assert_eq!(
            sync.source_with(env(&[(PIP_DOWNLOAD_CACHE, "/pip")])),
            Some(PathBuf::from("/pip"))
        );

        let explicit = SyncConfig {
            cache_dir: Some(PathBuf::from("/explicit")),
        };
        assert_eq!(
            explicit.source_with(env(&[(PIP_DOWNLOAD_CACHE, "/pip")])),
            Some(PathBuf::from("/explicit"))
        );
    }
}
