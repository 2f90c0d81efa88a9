//! Sync command

use std::path::Path;

use anyhow::{Context, Result};
use prism_core::PackageIndex;

use crate::LogSink;

/// Copy new archives from a download cache, then update
pub async fn sync(index: &PackageIndex, from: Option<&Path>) -> Result<()> {
    let report = index.sync(from, &LogSink).await.context("Sync failed")?;
    println!(
        "Copied {} archive(s), {} new package(s) indexed",
        report.copied.len(),
        report.added.len()
    );
    Ok(())
}
