//! Watch command

use std::sync::Arc;

use anyhow::{Context, Result};
use prism_core::{ConsistencyWatcher, PackageIndex, PackageSink};
use tracing::info;

use crate::LogSink;

/// Update once, then run the consistency watcher until Ctrl-C
pub async fn watch(index: PackageIndex) -> Result<()> {
    let index = Arc::new(index);
    let sink: Arc<dyn PackageSink> = Arc::new(LogSink);

    index
        .update(&sink)
        .await
        .context("Initial update failed")?;

    let handle = ConsistencyWatcher::new(index.clone(), sink).spawn();
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Interrupt received, stopping watcher");
    handle.stop().await;
    Ok(())
}
