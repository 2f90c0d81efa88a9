//! Child-process side of the process pool.

use std::io::{Read, Write};

use thiserror::Error;

use crate::inspect::{HashTask, InspectTask};
use crate::pool::{Task, serve};

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Unknown task kind '{0}'")]
    UnknownKind(String),

    #[error("Worker protocol error: {0}")]
    Protocol(#[from] serde_json::Error),
}

/// Task kinds a worker process can execute.
pub const KINDS: [&str; 2] = [InspectTask::KIND, HashTask::KIND];

/// Decode one task of `kind` from `input`, run it and write the result.
///
/// # Errors
///
/// Returns an error for unknown kinds or malformed payloads. Task failures
/// themselves are encoded in the output, not returned here.
pub fn run_worker<R: Read, W: Write>(kind: &str, input: R, output: W) -> Result<(), WorkerError> {
    match kind {
        InspectTask::KIND => serve::<InspectTask, _, _>(input, output)?,
        HashTask::KIND => serve::<HashTask, _, _>(input, output)?,
        other => return Err(WorkerError::UnknownKind(other.to_string())),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect::{InspectOutcome, Inspected};
    use crate::pool::TaskError;
    use crate::testing::write_sdist_gz;
    use tempfile::tempdir;

    #[test]
    fn dispatches_inspect() {
        let dir = tempdir().unwrap();
        let path = write_sdist_gz(dir.path(), "demo", "1.0");
        let task = InspectTask::new(path, None);
        let input = serde_json::to_vec(&task).unwrap();

        let mut out = Vec::new();
        run_worker("inspect", input.as_slice(), &mut out).unwrap();

        let result: Result<Inspected, TaskError> = serde_json::from_slice(&out).unwrap();
        let inspected = result.unwrap();
        assert!(matches!(inspected.outcome, InspectOutcome::Extracted { .. }));
    }

    #[test]
    fn task_failure_is_encoded() {
        let task = HashTask {
            path: "/nonexistent/demo-1.0.tar.gz".into(),
        };
        let input = serde_json::to_vec(&task).unwrap();

        let mut out = Vec::new();
        run_worker("hash", input.as_slice(), &mut out).unwrap();
        let result: Result<(std::path::PathBuf, prism_schema::ContentHash), TaskError> =
            serde_json::from_slice(&out).unwrap();
        assert!(matches!(result, Err(TaskError::Failed(_))));
    }

    #[test]
    fn rejects_unknown_kind() {
        let err = run_worker("compile", &b"{}"[..], Vec::new()).unwrap_err();
        assert!(matches!(err, WorkerError::UnknownKind(k) if k == "compile"));
    }
}
