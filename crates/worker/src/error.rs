use std::io;

/// Failures an execution context can end with.
///
/// Both variants end up as a FAILED task; they differ only in what gets
/// logged.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// The workload itself reported an error.
    #[error("Workload failed: {0}")]
    WorkloadFailure(String),

    /// The context died without reporting a result (panic, abnormal exit).
    #[error("Execution crashed: {0}")]
    ExecutionCrash(String),

    #[error("Failed to start execution context: {0}")]
    Spawn(#[from] io::Error),

    #[error("Failed to encode compute request: {0}")]
    Encode(#[from] serde_json::Error),
}
