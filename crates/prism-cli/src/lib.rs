//! prism - a self-maintaining private package index
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
//!
//! Thin process bootstrap around `prism-core`: configuration loading,
//! logging, and one subcommand per index entry point.

pub mod cmd;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use prism_core::{IndexConfig, PackageAdded, PackageIndex, PackageSink};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "prism")]
#[command(author, version, about = "prism - a self-maintaining private package index")]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = "PRISM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Index root directory (overrides config and PRISM_ROOT)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Index archives that are not in the manifest yet
    Update,
    /// Re-inspect every archive and rewrite the manifest and all listings
    Rebuild,
    /// Copy new archives in from a download cache, then update
    Sync {
        /// Cache directory (default: [sync].cache_dir or $PIP_DOWNLOAD_CACHE)
        #[arg(long)]
        from: Option<PathBuf>,
    },
    /// Update once, then keep the listings consistent until interrupted
    Watch,
    /// Print metadata and content hash of archives as JSON lines
    Inspect {
        /// Archive files
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Process pool worker: read one task from stdin, write the result to stdout
    #[command(hide = true)]
    Worker {
        /// Task kind
        kind: String,
    },
}

/// Resolve configuration: file, then `PRISM_*` variables, then `--root`.
pub fn load_config(file: Option<&Path>, root: Option<&Path>) -> Result<IndexConfig> {
    let mut config = match file {
        Some(path) => IndexConfig::load(path)?,
        None => IndexConfig::default(),
    };
    config.apply_env()?;
    if let Some(root) = root {
        config.root = Some(root.to_path_buf());
    }
    Ok(config)
}

pub fn open_index(cli: &Cli) -> Result<PackageIndex> {
    let config = load_config(cli.config.as_deref(), cli.root.as_deref())?;
    PackageIndex::open(config).context("Failed to open index")
}

/// Logs every new package.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl PackageSink for LogSink {
    fn package_added(&self, event: &PackageAdded) {
        info!(
            name = %event.name,
            version = %event.version,
            path = %event.path.display(),
            "New package"
        );
    }
}
