use std::sync::Arc;

use taskforge_core::admission::AdmissionLimits;
use taskforge_core::error::CoreError;
use taskforge_core::events::CancelRequest;
use taskforge_core::task::TaskParams;
use taskforge_core::types::{new_task_id, DbId, TaskId};
use taskforge_db::models::task::{CreateTask, StatusChange, StatusUpdate, Task};
use taskforge_db::repositories::{JobQueueRepo, Submission, TaskRepo};
use taskforge_db::DbPool;
use taskforge_events::TaskBus;

use crate::error::AppResult;

/// Task operations exposed to clients.
///
/// The store is written first and is authoritative; bus messages follow
/// and a failure to publish is logged, never returned.
#[derive(Clone)]
pub struct TaskService {
    pool: DbPool,
    bus: Arc<dyn TaskBus>,
    limits: AdmissionLimits,
}

impl TaskService {
    pub fn new(pool: DbPool, bus: Arc<dyn TaskBus>, limits: AdmissionLimits) -> Self {
        Self { pool, bus, limits }
    }

    pub fn limits(&self) -> &AdmissionLimits {
        &self.limits
    }

    // -----------------------------------------------------------------------
    // Submit
    // -----------------------------------------------------------------------

    /// Validate, admit and enqueue a new task.
    ///
    /// An oversized workload fails validation before the store is touched.
    /// The per-user cap is checked in the same transaction that inserts the
    /// row and enqueues the job, so concurrent submissions cannot overshoot.
    pub async fn submit(&self, owner_id: DbId, params: TaskParams) -> AppResult<Task> {
        params.validate_with_ceiling(self.limits.max_iterations)?;

        let input = CreateTask {
            id: new_task_id(),
            owner_id,
            params,
        };
        match TaskRepo::submit(&self.pool, &input, self.limits.max_concurrent_per_user).await? {
            Submission::Accepted(task) => {
                tracing::info!(
                    task_id = %task.id,
                    owner_id,
                    iterations = params.iterations,
                    "Task submitted",
                );
                self.publish_update(&task).await;
                Ok(task)
            }
            Submission::Rejected { active } => {
                tracing::info!(owner_id, active, "Submission rejected by admission control");
                Err(CoreError::AdmissionRejected {
                    active,
                    limit: self.limits.max_concurrent_per_user,
                }
                .into())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// The owner's tasks, newest first.
    pub async fn list(&self, owner_id: DbId) -> AppResult<Vec<Task>> {
        Ok(TaskRepo::list_by_owner(&self.pool, owner_id).await?)
    }

    /// One task, visible only to its owner. Other users get `NotFound`.
    pub async fn get(&self, owner_id: DbId, task_id: TaskId) -> AppResult<Task> {
        TaskRepo::find_for_owner(&self.pool, task_id, owner_id)
            .await?
            .ok_or_else(|| CoreError::task_not_found(task_id).into())
    }

    // -----------------------------------------------------------------------
    // Cancel
    // -----------------------------------------------------------------------

    /// Cancel a PENDING or RUNNING task.
    ///
    /// The CANCELED write is optimistic: a running context stops shortly
    /// afterwards, when its coordinator receives the broadcast.
    pub async fn cancel(&self, owner_id: DbId, task_id: TaskId) -> AppResult<Task> {
        let task = self.get(owner_id, task_id).await?;
        if task.status.is_terminal() {
            return Err(CoreError::AlreadyTerminal {
                status: task.status,
            }
            .into());
        }

        let canceled =
            match TaskRepo::update_status(&self.pool, task_id, &StatusChange::canceled()).await? {
                StatusUpdate::Applied(task) => task,
                // Finished between the read and the write.
                StatusUpdate::Rejected { current } => {
                    return Err(CoreError::AlreadyTerminal { status: current }.into());
                }
                StatusUpdate::NotFound => return Err(CoreError::task_not_found(task_id).into()),
            };

        match JobQueueRepo::remove_pending(&self.pool, task_id).await {
            Ok(true) => tracing::debug!(%task_id, "Removed queued job"),
            // Already claimed; the claimant's RUNNING write will be rejected.
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(%task_id, error = %e, "Failed to remove queued job");
            }
        }

        if let Err(e) = self
            .bus
            .publish_cancel(&CancelRequest::new(task_id, owner_id))
            .await
        {
            tracing::warn!(%task_id, error = %e, "Failed to broadcast cancellation");
        }
        self.publish_update(&canceled).await;

        tracing::info!(
            %task_id,
            owner_id,
            previous = %task.status,
            "Task canceled",
        );
        Ok(canceled)
    }

    async fn publish_update(&self, task: &Task) {
        if let Err(e) = self.bus.publish_update(&task.to_update()).await {
            tracing::warn!(task_id = %task.id, error = %e, "Failed to publish task update");
        }
    }
}
