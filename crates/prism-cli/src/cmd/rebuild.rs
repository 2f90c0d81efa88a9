//! Rebuild command

use anyhow::{Context, Result};
use prism_core::PackageIndex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::LogSink;

/// Full re-scan. Ctrl-C stops between writes.
pub async fn rebuild(index: &PackageIndex) -> Result<()> {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current write");
            on_signal.cancel();
        }
    });

    let report = index
        .rebuild(&LogSink, &cancel)
        .await
        .context("Rebuild failed")?;
    println!(
        "Rebuilt {} package(s) in {} project(s); {} new, {} pruned",
        report.packages,
        report.projects,
        report.added.len(),
        report.pruned.len()
    );
    Ok(())
}
