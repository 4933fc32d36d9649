use std::collections::HashMap;

use taskforge_core::types::{DbId, TaskId, Timestamp};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// A task currently executing on this coordinator.
pub struct Assignment {
    pub owner_id: DbId,
    /// Cancelling this token terminates the execution context.
    pub terminate: CancellationToken,
    pub started_at: Timestamp,
}

/// Per-coordinator map of task id to running execution.
///
/// Cancellation requests are fanned out to every coordinator; only the one
/// holding the task in its registry acts on it.
#[derive(Default)]
pub struct AssignmentRegistry {
    assignments: RwLock<HashMap<TaskId, Assignment>>,
}

impl AssignmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, task_id: TaskId, owner_id: DbId, terminate: CancellationToken) {
        let assignment = Assignment {
            owner_id,
            terminate,
            started_at: chrono::Utc::now(),
        };
        self.assignments.write().await.insert(task_id, assignment);
    }

    pub async fn deregister(&self, task_id: TaskId) -> bool {
        self.assignments.write().await.remove(&task_id).is_some()
    }

    /// Signal the execution of `task_id` to stop.
    ///
    /// Returns `false` when the task is not running here. The entry stays
    /// until the coordinator has seen the context exit.
    pub async fn terminate(&self, task_id: TaskId) -> bool {
        match self.assignments.read().await.get(&task_id) {
            Some(assignment) => {
                assignment.terminate.cancel();
                true
            }
            None => false,
        }
    }

    /// Signal every execution to stop. Returns how many were signalled.
    pub async fn terminate_all(&self) -> usize {
        let assignments = self.assignments.read().await;
        for assignment in assignments.values() {
            assignment.terminate.cancel();
        }
        assignments.len()
    }

    pub async fn contains(&self, task_id: TaskId) -> bool {
        self.assignments.read().await.contains_key(&task_id)
    }

    pub async fn task_ids(&self) -> Vec<TaskId> {
        self.assignments.read().await.keys().copied().collect()
    }

    pub async fn active_count(&self) -> usize {
        self.assignments.read().await.len()
    }
}
