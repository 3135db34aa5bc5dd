//! Process-isolated execution of the meshing routine.
//!
//! Every job runs in a fresh worker process so a crash in the mesher cannot
//! take the service down. A fair semaphore caps the number of live workers;
//! submissions beyond the cap queue in arrival order. The permit belongs to
//! a detached task that owns the worker, so a caller that stops waiting
//! (deadline, client gone) does not free the slot until the worker exits.

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tetra_mesh::grid::{GridCodecError, decode_tetra_grid};
use tetra_mesh::{Mesh, TetraGrid, TetraOptions, codec};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

const STDERR_TAIL: usize = 2048;

/// Program and leading arguments that start a worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// The running executable's `worker` subcommand.
    pub fn current_exe() -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?).arg("worker"))
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn command(&self, options: &TetraOptions) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("--edge-length-fac")
            .arg(options.edge_length_fac.to_string())
            .arg("--optimize")
            .arg(options.optimize.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        command
    }
}

/// Why a worker did not hand back a grid. Callers match on the variant,
/// never on anything the mesher itself raised.
#[derive(Debug, Error)]
pub enum ComputeFailure {
    #[error("failed to launch worker: {0}")]
    Spawn(#[source] io::Error),

    #[error("worker crashed ({status}): {stderr}")]
    Crashed { status: ExitStatus, stderr: String },

    #[error("worker rejected the input (exit code {code}): {stderr}")]
    Rejected { code: i32, stderr: String },

    #[error("worker produced an unreadable grid: {0}")]
    InvalidOutput(#[from] GridCodecError),

    #[error("worker pipe failed: {0}")]
    Io(#[source] io::Error),

    #[error("input mesh could not be encoded: {0}")]
    InvalidInput(#[from] codec::CodecError),

    #[error("compute job aborted before completion")]
    Aborted,
}

#[derive(Debug, Error)]
pub enum ComputeError {
    #[error(transparent)]
    Failure(#[from] ComputeFailure),

    #[error("compute did not finish within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone)]
pub struct ComputeExecutor {
    worker: WorkerCommand,
    slots: Arc<Semaphore>,
    pool_size: usize,
    next_job: Arc<AtomicU64>,
}

impl ComputeExecutor {
    pub fn new(worker: WorkerCommand, pool_size: usize) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            worker,
            slots: Arc::new(Semaphore::new(pool_size)),
            pool_size,
            next_job: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Worker slots not held by a running or abandoned job.
    pub fn idle_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Runs one meshing job in a worker process. With a deadline, the wait
    /// (queueing included) is bounded; on expiry the job keeps running
    /// detached and `ComputeError::Timeout` is returned. Failures are never
    /// retried.
    pub async fn submit(
        &self,
        mesh: Mesh,
        options: TetraOptions,
        deadline: Option<Duration>,
    ) -> Result<TetraGrid, ComputeError> {
        let job = self.next_job.fetch_add(1, Ordering::Relaxed);
        let payload = codec::encode(&mesh).map_err(ComputeFailure::from)?;
        drop(mesh);

        let command = self.worker.command(&options);
        let slots = Arc::clone(&self.slots);
        let queued_at = Instant::now();
        debug!(
            job,
            bytes = payload.len(),
            idle_slots = slots.available_permits(),
            "submitting compute job"
        );

        let handle = tokio::spawn(async move {
            let _permit = slots
                .acquire_owned()
                .await
                .map_err(|_| ComputeFailure::Aborted)?;
            debug!(job, waited_ms = queued_at.elapsed().as_millis() as u64, "worker slot acquired");
            run_worker(command, payload).await
        });

        let joined = match deadline {
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(job, ?limit, "compute deadline expired; worker left running");
                    return Err(ComputeError::Timeout(limit));
                }
            },
            None => handle.await,
        };

        let outcome = joined.unwrap_or_else(|err| {
            error!(job, %err, "compute task did not complete");
            Err(ComputeFailure::Aborted)
        });

        match outcome {
            Ok(grid) => {
                debug!(
                    job,
                    elapsed_ms = queued_at.elapsed().as_millis() as u64,
                    points = grid.points.len(),
                    tetrahedra = grid.tetrahedra.len(),
                    "compute job finished"
                );
                Ok(grid)
            }
            Err(failure) => {
                error!(job, %failure, "compute job failed");
                Err(failure.into())
            }
        }
    }
}

async fn run_worker(mut command: Command, payload: Vec<u8>) -> Result<TetraGrid, ComputeFailure> {
    let mut child = command.spawn().map_err(ComputeFailure::Spawn)?;

    // Feed stdin concurrently with draining stdout so neither pipe stalls.
    let stdin = child.stdin.take();
    let feeder = tokio::spawn(async move {
        let Some(mut stdin) = stdin else {
            return Ok(());
        };
        stdin.write_all(&payload).await?;
        stdin.shutdown().await
    });

    let output = child
        .wait_with_output()
        .await
        .map_err(ComputeFailure::Io)?;
    let fed = feeder.await.unwrap_or(Ok(()));

    let stderr = stderr_tail(&output.stderr);
    if !output.status.success() {
        return Err(match output.status.code() {
            Some(code) => ComputeFailure::Rejected { code, stderr },
            None => ComputeFailure::Crashed {
                status: output.status,
                stderr,
            },
        });
    }
    // A clean exit that did not take all input still produced nothing usable.
    fed.map_err(ComputeFailure::Io)?;

    Ok(decode_tetra_grid(&output.stdout)?)
}

fn stderr_tail(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    let start = text
        .char_indices()
        .map(|(index, _)| index)
        .find(|&index| text.len() - index <= STDERR_TAIL)
        .unwrap_or(text.len());
    text[start..].to_string()
}
