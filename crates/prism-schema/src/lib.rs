//! Shared types and on-disk formats for the prism package index.
//!
//! The manifest (`index.json` at the index root), the per-project leaf
//! listings and the content hash that keys them all live here so that the
//! engine and its worker processes agree on one wire format.

/// Content hash used as the manifest key.
pub mod hash;
/// Manifest, leaf listing and package metadata records.
pub mod types;

// Re-exports
pub use hash::*;
pub use types::*;
