//! Hidden worker command used by the process pool

use anyhow::{Context, Result};
use prism_core::run_worker;

pub fn worker(kind: &str) -> Result<()> {
    let stdin = std::io::stdin().lock();
    let stdout = std::io::stdout().lock();
    run_worker(kind, stdin, stdout).with_context(|| format!("Worker '{kind}' failed"))
}
