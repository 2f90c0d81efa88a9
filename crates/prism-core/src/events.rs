//! Package-added notifications
//!
//! The sink is handed to each update, rebuild or sync call. Events fire
//! once per new manifest entry, after the manifest has been persisted.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageAdded {
    pub name: String,
    pub version: String,
    pub path: PathBuf,
}

/// Receiver of [`PackageAdded`] events, e.g. an upload forwarder.
pub trait PackageSink: Send + Sync {
    fn package_added(&self, event: &PackageAdded);
}

impl<T: PackageSink + ?Sized> PackageSink for std::sync::Arc<T> {
    fn package_added(&self, event: &PackageAdded) {
        (**self).package_added(event);
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl PackageSink for NullSink {
    fn package_added(&self, _: &PackageAdded) {}
}

/// Forwards events to an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<PackageAdded>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PackageAdded>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PackageSink for ChannelSink {
    fn package_added(&self, event: &PackageAdded) {
        // A closed receiver just means nobody is listening any more.
        let _ = self.tx.send(event.clone());
    }
}
