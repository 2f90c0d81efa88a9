//! Update command

use anyhow::{Context, Result};
use prism_core::PackageIndex;

use crate::LogSink;

/// Index archives not yet in the manifest
pub async fn update(index: &PackageIndex) -> Result<()> {
    let added = index.update(&LogSink).await.context("Update failed")?;
    println!("{} new package(s) indexed in {}", added.len(), index.root().display());
    Ok(())
}
