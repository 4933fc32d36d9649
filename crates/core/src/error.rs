use crate::task::TaskStatus;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    /// Per-user concurrency cap reached; the client should retry later.
    #[error("Admission rejected: {active} active tasks (limit {limit})")]
    AdmissionRejected { active: i64, limit: i64 },

    #[error("Task is already terminal ({status})")]
    AlreadyTerminal { status: TaskStatus },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Store or bus unreachable. The task stays in its last persisted state.
    #[error("Infrastructure unavailable: {0}")]
    Infrastructure(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn task_not_found(id: impl ToString) -> Self {
        CoreError::NotFound {
            entity: "Task",
            id: id.to_string(),
        }
    }
}
