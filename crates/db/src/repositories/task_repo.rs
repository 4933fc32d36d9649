//! Repository for the `tasks` table.
//!
//! Every status write is a compare-and-swap: the `UPDATE` only matches rows
//! whose current status is an allowed predecessor of the new one, so a
//! terminal status can never be overwritten no matter how many processes
//! race on the same row.

use chrono::Utc;
use sqlx::sqlite::SqliteExecutor;
use sqlx::types::Json;
use taskforge_core::task::{TaskStatus, ACTIVE_STATUSES};
use taskforge_core::types::{DbId, TaskId};

use crate::models::job::JobDescriptor;
use crate::models::task::{CreateTask, StatusChange, StatusUpdate, Task};
use crate::repositories::job_queue_repo::JobQueueRepo;
use crate::DbPool;

/// Column list for `tasks` queries.
const COLUMNS: &str = "\
    id, owner_id, status, progress, params, result, worker_id, \
    created_at, updated_at";

/// Render statuses as a SQL `IN` list. Status strings are static literals.
fn status_list(statuses: &[TaskStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Outcome of [`TaskRepo::submit`].
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Accepted(Task),
    /// The owner already holds `active` PENDING or RUNNING tasks.
    Rejected { active: i64 },
}

/// Provides persistence for task records.
pub struct TaskRepo;

impl TaskRepo {
    /// Insert a PENDING task unconditionally.
    pub async fn create<'e, E>(executor: E, input: &CreateTask) -> Result<Task, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        let now = Utc::now();
        let query = format!(
            "INSERT INTO tasks (id, owner_id, status, progress, params, created_at, updated_at) \
             VALUES (?1, ?2, ?3, 0, ?4, ?5, ?5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(input.id.to_string())
            .bind(input.owner_id)
            .bind(TaskStatus::Pending.as_str())
            .bind(Json(&input.params))
            .bind(now)
            .fetch_one(executor)
            .await
    }

    /// Admit and enqueue a task in one transaction.
    ///
    /// The cap check and the insert are a single `INSERT .. SELECT .. WHERE`
    /// statement, so two concurrent submissions from the same owner cannot
    /// both squeeze under the cap. Nothing is written when rejected.
    pub async fn submit(
        pool: &DbPool,
        input: &CreateTask,
        max_active: i64,
    ) -> Result<Submission, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let now = Utc::now();
        let query = format!(
            "INSERT INTO tasks (id, owner_id, status, progress, params, created_at, updated_at) \
             SELECT ?1, ?2, ?3, 0, ?4, ?5, ?5 \
             WHERE (SELECT COUNT(*) FROM tasks \
                    WHERE owner_id = ?2 AND status IN ({active})) < ?6 \
             RETURNING {COLUMNS}",
            active = status_list(&ACTIVE_STATUSES),
        );
        let inserted = sqlx::query_as::<_, Task>(&query)
            .bind(input.id.to_string())
            .bind(input.owner_id)
            .bind(TaskStatus::Pending.as_str())
            .bind(Json(&input.params))
            .bind(now)
            .bind(max_active)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(task) = inserted else {
            let active = Self::count_active(&mut *tx, input.owner_id).await?;
            tx.rollback().await?;
            return Ok(Submission::Rejected { active });
        };

        JobQueueRepo::enqueue(
            &mut *tx,
            &JobDescriptor {
                task_id: task.id,
                owner_id: task.owner_id,
                params: task.params,
            },
        )
        .await?;
        tx.commit().await?;

        Ok(Submission::Accepted(task))
    }

    pub async fn find_by_id(pool: &DbPool, id: TaskId) -> Result<Option<Task>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM tasks WHERE id = ?1");
        sqlx::query_as::<_, Task>(&query)
            .bind(id.to_string())
            .fetch_optional(pool)
            .await
    }

    /// Find a task only if it belongs to `owner_id`.
    pub async fn find_for_owner(
        pool: &DbPool,
        id: TaskId,
        owner_id: DbId,
    ) -> Result<Option<Task>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM tasks WHERE id = ?1 AND owner_id = ?2");
        sqlx::query_as::<_, Task>(&query)
            .bind(id.to_string())
            .bind(owner_id)
            .fetch_optional(pool)
            .await
    }

    /// All tasks of one owner, newest first. Tasks are never deleted, so
    /// `rowid` follows insertion order.
    pub async fn list_by_owner(pool: &DbPool, owner_id: DbId) -> Result<Vec<Task>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM tasks WHERE owner_id = ?1 ORDER BY rowid DESC"
        );
        sqlx::query_as::<_, Task>(&query)
            .bind(owner_id)
            .fetch_all(pool)
            .await
    }

    /// Number of PENDING or RUNNING tasks held by `owner_id`.
    pub async fn count_active<'e, E>(executor: E, owner_id: DbId) -> Result<i64, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        let query = format!(
            "SELECT COUNT(*) FROM tasks WHERE owner_id = ?1 AND status IN ({})",
            status_list(&ACTIVE_STATUSES)
        );
        let (count,): (i64,) = sqlx::query_as(&query)
            .bind(owner_id)
            .fetch_one(executor)
            .await?;
        Ok(count)
    }

    /// Conditionally write a new status.
    ///
    /// Progress is kept monotonic with `MAX`. `result` and `worker_id` are
    /// only overwritten when the change carries a value.
    pub async fn update_status(
        pool: &DbPool,
        id: TaskId,
        change: &StatusChange,
    ) -> Result<StatusUpdate, sqlx::Error> {
        let predecessors = change.status.allowed_predecessors();
        if predecessors.is_empty() {
            return Ok(match Self::find_by_id(pool, id).await? {
                Some(task) => StatusUpdate::Rejected {
                    current: task.status,
                },
                None => StatusUpdate::NotFound,
            });
        }

        let query = format!(
            "UPDATE tasks SET \
                 status = ?1, \
                 progress = MAX(progress, ?2), \
                 result = COALESCE(?3, result), \
                 worker_id = COALESCE(?4, worker_id), \
                 updated_at = ?5 \
             WHERE id = ?6 AND status IN ({}) \
             RETURNING {COLUMNS}",
            status_list(predecessors)
        );
        let updated = sqlx::query_as::<_, Task>(&query)
            .bind(change.status.as_str())
            .bind(i64::from(change.progress.min(100)))
            .bind(change.result.as_ref().map(Json))
            .bind(change.worker_id.as_deref())
            .bind(Utc::now())
            .bind(id.to_string())
            .fetch_optional(pool)
            .await?;

        if let Some(task) = updated {
            return Ok(StatusUpdate::Applied(task));
        }

        let current: Option<(String,)> = sqlx::query_as("SELECT status FROM tasks WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(pool)
            .await?;
        match current {
            None => Ok(StatusUpdate::NotFound),
            Some((status,)) => {
                let current = status.parse::<TaskStatus>().map_err(|e| {
                    sqlx::Error::ColumnDecode {
                        index: "status".into(),
                        source: Box::new(e),
                    }
                })?;
                Ok(StatusUpdate::Rejected { current })
            }
        }
    }
}
