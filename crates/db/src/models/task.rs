//! Task entity model and DTOs.

use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::types::Json;
use sqlx::{FromRow, Row};
use taskforge_core::events::TaskUpdate;
use taskforge_core::task::{TaskParams, TaskResult, TaskStatus};
use taskforge_core::types::{DbId, TaskId, Timestamp};

/// A row from the `tasks` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub owner_id: DbId,
    pub status: TaskStatus,
    pub progress: u8,
    pub params: TaskParams,
    pub result: Option<TaskResult>,
    /// Worker that last moved this task to RUNNING.
    pub worker_id: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Task {
    /// Bus notification announcing the record as it is now.
    pub fn to_update(&self) -> TaskUpdate {
        let update = TaskUpdate::new(self.id, self.owner_id, self.status, self.progress)
            .with_result(self.result.clone());
        match &self.worker_id {
            Some(worker_id) => update.with_worker(worker_id.clone()),
            None => update,
        }
    }
}

impl<'r> FromRow<'r, SqliteRow> for Task {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let id: String = row.try_get("id")?;
        let status: String = row.try_get("status")?;
        let progress: i64 = row.try_get("progress")?;
        let Json(params) = row.try_get::<Json<TaskParams>, _>("params")?;
        let result = row
            .try_get::<Option<Json<TaskResult>>, _>("result")?
            .map(|Json(result)| result);

        Ok(Self {
            id: TaskId::parse_str(&id).map_err(|e| decode_error("id", e))?,
            owner_id: row.try_get("owner_id")?,
            status: status
                .parse::<TaskStatus>()
                .map_err(|e| decode_error("status", e))?,
            progress: u8::try_from(progress).map_err(|e| decode_error("progress", e))?,
            params,
            result,
            worker_id: row.try_get("worker_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

fn decode_error(
    column: &str,
    source: impl std::error::Error + Send + Sync + 'static,
) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(source),
    }
}

/// DTO for inserting a PENDING task.
#[derive(Debug, Clone)]
pub struct CreateTask {
    pub id: TaskId,
    pub owner_id: DbId,
    pub params: TaskParams,
}

/// A requested status write. Applied only if the current status is one of
/// `status.allowed_predecessors()`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub status: TaskStatus,
    /// Never lowers the stored progress.
    pub progress: u8,
    pub result: Option<TaskResult>,
    pub worker_id: Option<String>,
}

impl StatusChange {
    pub fn running(progress: u8, worker_id: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Running,
            progress,
            result: None,
            worker_id: Some(worker_id.into()),
        }
    }

    pub fn completed(result: TaskResult) -> Self {
        Self {
            status: TaskStatus::Completed,
            progress: 100,
            result: Some(result),
            worker_id: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failed,
            progress: 0,
            result: Some(TaskResult::error(message)),
            worker_id: None,
        }
    }

    pub fn canceled() -> Self {
        Self {
            status: TaskStatus::Canceled,
            progress: 0,
            result: Some(TaskResult::canceled_by_user()),
            worker_id: None,
        }
    }
}

/// Outcome of a conditional status write.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    Applied(Task),
    NotFound,
    /// The record exists but its status does not allow the transition.
    Rejected { current: TaskStatus },
}
