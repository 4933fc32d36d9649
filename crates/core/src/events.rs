//! Messages carried on the publish/subscribe bus.
//!
//! The bus only notifies. Every consumer treats the task store as the
//! source of truth and tolerates dropped or duplicated messages.

use serde::{Deserialize, Serialize};

use crate::task::{TaskResult, TaskStatus};
use crate::types::{DbId, TaskId, Timestamp};

/// Channel carrying [`TaskUpdate`] messages.
pub const TASK_UPDATES_CHANNEL: &str = "task_updates_channel";

/// Channel carrying [`CancelRequest`] messages.
pub const TASK_CANCEL_CHANNEL: &str = "task_cancel_channel";

/// WebSocket message type for task updates pushed to clients.
pub const MSG_TYPE_TASK_UPDATE: &str = "task_update";

/// A status or progress change, published after it has been persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub task_id: TaskId,
    pub owner_id: DbId,
    pub status: TaskStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    pub timestamp: Timestamp,
}

impl TaskUpdate {
    pub fn new(task_id: TaskId, owner_id: DbId, status: TaskStatus, progress: u8) -> Self {
        Self {
            task_id,
            owner_id,
            status,
            progress,
            result: None,
            worker_id: None,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn with_result(mut self, result: Option<TaskResult>) -> Self {
        self.result = result;
        self
    }

    pub fn with_worker(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    /// The client-facing `task_update` payload.
    pub fn to_client_message(&self) -> serde_json::Value {
        let mut msg = serde_json::json!({
            "type": MSG_TYPE_TASK_UPDATE,
            "taskId": self.task_id,
            "status": self.status,
            "progress": self.progress,
        });
        if let Some(result) = &self.result {
            msg["result"] = serde_json::to_value(result).unwrap_or(serde_json::Value::Null);
        }
        if let Some(worker_id) = &self.worker_id {
            msg["workerId"] = serde_json::Value::from(worker_id.as_str());
        }
        msg
    }
}

/// Request that whichever coordinator is running `task_id` stop it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRequest {
    pub task_id: TaskId,
    pub requested_by: DbId,
    pub timestamp: Timestamp,
}

impl CancelRequest {
    pub fn new(task_id: TaskId, requested_by: DbId) -> Self {
        Self {
            task_id,
            requested_by,
            timestamp: chrono::Utc::now(),
        }
    }
}
