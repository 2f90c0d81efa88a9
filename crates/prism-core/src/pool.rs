//! Concurrent task runner
//!
//! Maps a stateless unit of work over a batch, either on blocking threads
//! (shared memory) or in child processes (full isolation). Results come
//! back in completion order and one failing item never aborts its siblings.
//!
//! A [`Task`] is plain serde data: in process mode it is shipped to
//! `<program> worker <KIND>` on stdin and its `Result` is read back from
//! stdout, so it must never capture live handles or locks.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::config::PoolConfig;

/// Per-item failure marker. Serializable so it can cross a process boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskError {
    #[error("Task failed: {0}")]
    Failed(String),

    #[error("Worker panicked: {0}")]
    Panicked(String),

    #[error("Worker process failed: {0}")]
    Process(String),
}

impl TaskError {
    pub fn failed(err: impl std::fmt::Display) -> Self {
        Self::Failed(err.to_string())
    }

    fn process(err: impl std::fmt::Display) -> Self {
        Self::Process(err.to_string())
    }
}

/// A self-contained unit of work.
pub trait Task: Serialize + DeserializeOwned + Send + 'static {
    /// Name the worker subcommand dispatches on.
    const KIND: &'static str;

    type Output: Serialize + DeserializeOwned + Send + 'static;

    /// Execute the task. Must not depend on any state outside `self`.
    ///
    /// # Errors
    ///
    /// Returns a [`TaskError`] describing why this single item failed.
    fn run(self) -> Result<Self::Output, TaskError>;
}

/// Isolation strategy for the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolKind {
    /// Blocking threads sharing the process; good for IO-bound extraction.
    #[default]
    Thread,
    /// One child process per task; survives crashes in a single archive.
    Process,
}

impl std::str::FromStr for PoolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "thread" => Ok(Self::Thread),
            "process" => Ok(Self::Process),
            other => Err(format!("unknown pool kind '{other}' (expected thread or process)")),
        }
    }
}

/// Outcome of one task, tagged with its submission index.
#[derive(Debug)]
pub struct Completed<T> {
    pub index: usize,
    pub result: Result<T, TaskError>,
}

/// Bounded pool configuration. The pool itself is created and torn down
/// inside every [`TaskRunner::run`] call.
#[derive(Debug, Clone)]
pub struct TaskRunner {
    kind: PoolKind,
    workers: usize,
    program: Option<PathBuf>,
}

impl TaskRunner {
    pub fn threads(workers: usize) -> Self {
        Self {
            kind: PoolKind::Thread,
            workers: workers.max(1),
            program: None,
        }
    }

    pub fn processes(workers: usize, program: impl Into<PathBuf>) -> Self {
        Self {
            kind: PoolKind::Process,
            workers: workers.max(1),
            program: Some(program.into()),
        }
    }

    /// Build a runner from configuration.
    ///
    /// Process mode without an explicit program re-executes the current binary.
    pub fn from_config(config: &PoolConfig) -> Self {
        let program = match config.kind {
            PoolKind::Thread => None,
            PoolKind::Process => config
                .program
                .clone()
                .or_else(|| std::env::current_exe().ok()),
        };
        Self {
            kind: config.kind,
            workers: config.worker_count(),
            program,
        }
    }

    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run every task and collect outcomes in completion order.
    ///
    /// Dropping the returned future aborts queued work; child processes are
    /// killed when their handles drop.
    pub async fn run<T: Task>(&self, tasks: Vec<T>) -> Vec<Completed<T::Output>> {
        let started = Instant::now();
        let total = tasks.len();
        let permits = Arc::new(Semaphore::new(self.workers));
        let mut set: JoinSet<Completed<T::Output>> = JoinSet::new();

        for (index, task) in tasks.into_iter().enumerate() {
            let permits = permits.clone();
            match (self.kind, self.program.clone()) {
                (PoolKind::Process, Some(program)) => {
                    set.spawn(async move {
                        let _permit = permits.acquire_owned().await;
                        let result = run_in_process(&program, task).await;
                        Completed { index, result }
                    });
                }
                (PoolKind::Process, None) => {
                    set.spawn(async move {
                        Completed {
                            index,
                            result: Err(TaskError::process("no worker program configured")),
                        }
                    });
                }
                (PoolKind::Thread, _) => {
                    set.spawn(async move {
                        let _permit = permits.acquire_owned().await;
                        let result = match tokio::task::spawn_blocking(move || task.run()).await {
                            Ok(result) => result,
                            Err(e) => Err(TaskError::Panicked(e.to_string())),
                        };
                        Completed { index, result }
                    });
                }
            }
        }

        let mut outcomes = Vec::with_capacity(total);
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(completed) => {
                    if let Err(e) = &completed.result {
                        debug!(kind = T::KIND, index = completed.index, error = %e, "Task failed");
                    }
                    outcomes.push(completed);
                }
                Err(e) => error!(kind = T::KIND, error = %e, "Pool task aborted"),
            }
        }

        debug!(
            kind = T::KIND,
            pool = ?self.kind,
            total,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch finished"
        );
        outcomes
    }
}

async fn run_in_process<T: Task>(program: &Path, task: T) -> Result<T::Output, TaskError> {
    let payload = serde_json::to_vec(&task).map_err(TaskError::process)?;

    let mut child = tokio::process::Command::new(program)
        .arg("worker")
        .arg(T::KIND)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| TaskError::process(format!("spawn {}: {e}", program.display())))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(&payload).await.map_err(TaskError::process)?;
    }

    let output = child.wait_with_output().await.map_err(TaskError::process)?;
    if !output.status.success() {
        return Err(TaskError::process(format!("worker exited with {}", output.status)));
    }

    serde_json::from_slice::<Result<T::Output, TaskError>>(&output.stdout)
        .map_err(|e| TaskError::process(format!("undecodable worker output: {e}")))?
}

/// Worker side of process mode: decode one task, run it, encode the result.
///
/// # Errors
///
/// Returns an error if the task cannot be decoded or the result cannot be written.
pub fn serve<T: Task, R: Read, W: Write>(input: R, mut output: W) -> Result<(), serde_json::Error> {
    let task: T = serde_json::from_reader(input)?;
    let result = task.run();
    serde_json::to_writer(&mut output, &result)?;
    output.flush().map_err(serde_json::Error::io)
}
