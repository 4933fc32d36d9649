//! Queue payloads for the `job_queue` table.

use serde::{Deserialize, Serialize};
use taskforge_core::task::TaskParams;
use taskforge_core::types::{DbId, TaskId};

/// Everything a coordinator needs to run a task without reading the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub task_id: TaskId,
    pub owner_id: DbId,
    pub params: TaskParams,
}

/// A job handed to one worker under a lease.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job: JobDescriptor,
    pub worker_id: String,
    /// Number of times this job has been claimed, this claim included.
    pub attempts: i64,
    /// Lease expiry in Unix milliseconds.
    pub lease_expires_at: i64,
}
