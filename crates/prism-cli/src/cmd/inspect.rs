//! Inspect command

use std::path::PathBuf;

use anyhow::{Result, bail};
use prism_core::inspect::{classify, content_hash, extract};
use serde_json::json;

/// Print one JSON line per archive. Nothing is quarantined.
pub fn inspect(paths: &[PathBuf]) -> Result<()> {
    let mut failed = 0;
    for path in paths {
        let result = classify(path).and_then(|format| {
            let hash = content_hash(path)?;
            let meta = extract(path)?;
            Ok((format, hash, meta))
        });
        let line = match result {
            Ok((format, hash, meta)) => json!({
                "path": path,
                "format": format,
                "hash": hash,
                "name": meta.name,
                "version": meta.version,
            }),
            Err(e) => {
                failed += 1;
                json!({ "path": path, "error": e.to_string() })
            }
        };
        println!("{line}");
    }

    if failed > 0 {
        bail!("{failed} of {} archive(s) could not be inspected", paths.len());
    }
    Ok(())
}
