//! Execution contexts: the isolated unit that runs one task.
//!
//! A context emits zero or more [`ExecEvent::Progress`] followed by exactly
//! one of [`ExecEvent::Completed`] / [`ExecEvent::Failed`], unless it is
//! terminated, in which case no terminal event is sent. How it ended is
//! reported separately by [`ExecutionHandle::wait`].
//!
//! Two substrates are available:
//!
//! - [`Substrate::Subprocess`] runs the compute child process and kills it
//!   on termination. The task stops immediately.
//! - [`Substrate::Thread`] runs the workload on a blocking thread. A thread
//!   cannot be killed, so termination sets an in-memory flag that the
//!   workload sees at its next progress report.
//!
//! Neither substrate reads the task store; termination is always pushed in
//! through the handle's token.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use taskforge_core::task::TaskResult;
use taskforge_core::types::TaskId;
use taskforge_core::workload::{Checkpoint, Workload, WorkloadError};
use taskforge_db::models::job::JobDescriptor;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::compute::ComputeMessage;
use crate::error::ExecutionError;

/// Buffered events between a context and its coordinator.
const EVENT_BUFFER: usize = 64;

/// Maximum stderr captured from a compute child, for crash diagnostics.
const MAX_STDERR_BYTES: u64 = 16 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum ExecEvent {
    Progress(u8),
    Completed(TaskResult),
    Failed(String),
}

/// How a context ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit {
    /// A terminal event was delivered.
    Finished,
    /// Stopped through the termination token; no terminal event.
    Terminated,
    /// Died without a terminal event.
    Crashed(String),
}

#[derive(Clone)]
pub enum Substrate {
    Thread { workload: Arc<dyn Workload> },
    Subprocess { program: PathBuf, args: Vec<String> },
}

impl fmt::Debug for Substrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Substrate::Thread { workload } => f
                .debug_struct("Thread")
                .field("workload", &workload.name())
                .finish(),
            Substrate::Subprocess { program, args } => f
                .debug_struct("Subprocess")
                .field("program", program)
                .field("args", args)
                .finish(),
        }
    }
}

/// Owner's end of a running context.
#[derive(Debug)]
pub struct ExecutionHandle {
    task_id: TaskId,
    events: mpsc::Receiver<ExecEvent>,
    terminate: CancellationToken,
    supervisor: JoinHandle<Exit>,
}

impl ExecutionHandle {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Token that terminates this context when cancelled.
    pub fn terminator(&self) -> CancellationToken {
        self.terminate.clone()
    }

    pub fn terminate(&self) {
        self.terminate.cancel();
    }

    /// Next event, or `None` once the context will send no more.
    pub async fn next_event(&mut self) -> Option<ExecEvent> {
        self.events.recv().await
    }

    /// Wait for the context to end.
    pub async fn wait(self) -> Exit {
        match self.supervisor.await {
            Ok(exit) => exit,
            Err(e) => Exit::Crashed(format!("supervisor task failed: {e}")),
        }
    }
}

pub struct ExecutionContext;

impl ExecutionContext {
    /// Start running `job` on `substrate`.
    pub async fn start(
        substrate: &Substrate,
        job: &JobDescriptor,
    ) -> Result<ExecutionHandle, ExecutionError> {
        let (tx, events) = mpsc::channel(EVENT_BUFFER);
        let terminate = CancellationToken::new();

        let supervisor = match substrate {
            Substrate::Thread { workload } => {
                start_thread(workload.clone(), job.clone(), tx, terminate.clone())
            }
            Substrate::Subprocess { program, args } => {
                start_subprocess(program, args, job, tx, terminate.clone()).await?
            }
        };

        Ok(ExecutionHandle {
            task_id: job.task_id,
            events,
            terminate,
            supervisor,
        })
    }
}

// ---------------------------------------------------------------------------
// Thread substrate
// ---------------------------------------------------------------------------

fn start_thread(
    workload: Arc<dyn Workload>,
    job: JobDescriptor,
    tx: mpsc::Sender<ExecEvent>,
    terminate: CancellationToken,
) -> JoinHandle<Exit> {
    let flag = terminate.clone();
    let blocking = tokio::task::spawn_blocking(move || {
        let mut sink = |percent: u8| {
            if flag.is_cancelled() {
                return Checkpoint::Stop;
            }
            match tx.blocking_send(ExecEvent::Progress(percent)) {
                Ok(()) => Checkpoint::Continue,
                Err(_) => Checkpoint::Stop,
            }
        };
        let outcome = workload.run(&job.params, &mut sink);
        (outcome, tx)
    });

    tokio::spawn(async move {
        let (outcome, tx) = match blocking.await {
            Ok(done) => done,
            Err(e) if e.is_panic() => return Exit::Crashed(panic_message(e.into_panic())),
            Err(e) => return Exit::Crashed(e.to_string()),
        };
        if terminate.is_cancelled() {
            return Exit::Terminated;
        }
        let event = match outcome {
            Ok(result) => ExecEvent::Completed(result),
            Err(WorkloadError::Failed(message)) => ExecEvent::Failed(message),
            Err(WorkloadError::Interrupted) => return Exit::Terminated,
        };
        match tx.send(event).await {
            Ok(()) => Exit::Finished,
            Err(_) => Exit::Crashed("coordinator stopped listening".into()),
        }
    })
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("workload panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("workload panicked: {s}")
    } else {
        "workload panicked".to_string()
    }
}

// ---------------------------------------------------------------------------
// Subprocess substrate
// ---------------------------------------------------------------------------

async fn start_subprocess(
    program: &Path,
    args: &[String],
    job: &JobDescriptor,
    tx: mpsc::Sender<ExecEvent>,
    terminate: CancellationToken,
) -> Result<JoinHandle<Exit>, ExecutionError> {
    let request = serde_json::to_vec(job)?;

    // `kill_on_drop(true)` guarantees the child dies with its supervisor.
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        // Best-effort; a child that exits early reports through its exit status.
        let _ = stdin.write_all(&request).await;
        drop(stdin);
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ExecutionError::ExecutionCrash("compute stdout not captured".into()))?;
    let stderr = child.stderr.take();
    let stderr_task = tokio::spawn(read_capped(stderr));

    tracing::debug!(
        task_id = %job.task_id,
        pid = child.id(),
        "Compute process started",
    );

    Ok(tokio::spawn(supervise_child(
        child,
        stdout,
        stderr_task,
        tx,
        terminate,
    )))
}

async fn supervise_child(
    mut child: Child,
    stdout: ChildStdout,
    stderr_task: JoinHandle<Vec<u8>>,
    tx: mpsc::Sender<ExecEvent>,
    terminate: CancellationToken,
) -> Exit {
    let mut lines = BufReader::new(stdout).lines();
    let mut terminal_sent = false;

    loop {
        tokio::select! {
            _ = terminate.cancelled() => return kill(&mut child).await,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let event = match serde_json::from_str::<ComputeMessage>(&line) {
                        Ok(ComputeMessage::Progress { percent }) => ExecEvent::Progress(percent),
                        Ok(ComputeMessage::Completed { result }) => ExecEvent::Completed(result),
                        Ok(ComputeMessage::Failed { error }) => ExecEvent::Failed(error),
                        Err(e) => {
                            tracing::warn!(error = %e, "Ignoring unparseable compute output");
                            continue;
                        }
                    };
                    if terminal_sent {
                        continue;
                    }
                    terminal_sent = !matches!(event, ExecEvent::Progress(_));
                    if tx.send(event).await.is_err() {
                        return kill(&mut child).await;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Compute stdout read failed");
                    break;
                }
            },
        }
    }

    let status = tokio::select! {
        _ = terminate.cancelled() => return kill(&mut child).await,
        status = child.wait() => status,
    };

    if terminal_sent {
        return Exit::Finished;
    }

    let stderr = stderr_task.await.unwrap_or_default();
    let stderr = String::from_utf8_lossy(&stderr);
    let stderr = stderr.trim();
    match status {
        Ok(status) => Exit::Crashed(format!(
            "compute process exited with {status} without a result: {stderr}"
        )),
        Err(e) => Exit::Crashed(format!("failed to wait for compute process: {e}")),
    }
}

async fn kill(child: &mut Child) -> Exit {
    if let Err(e) = child.kill().await {
        tracing::warn!(error = %e, "Failed to kill compute process");
    }
    Exit::Terminated
}

async fn read_capped<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = (&mut h).take(MAX_STDERR_BYTES).read_to_end(&mut buf).await;
    }
    buf
}
