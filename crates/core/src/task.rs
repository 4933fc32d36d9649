//! Task lifecycle: statuses, the transition table, workload parameters and
//! the closed set of result payloads.
//!
//! The transition table is the only place that decides which prior statuses
//! a write may start from. The store turns it into a conditional update so
//! the rules hold under concurrent writers in different processes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Persisted task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
}

/// Statuses that count against the per-user concurrency cap.
pub const ACTIVE_STATUSES: [TaskStatus; 2] = [TaskStatus::Pending, TaskStatus::Running];

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Canceled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Canceled => "CANCELED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Canceled
        )
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Statuses a record may be in for a write of `self` to be accepted.
    ///
    /// `Running -> Running` is allowed so that progress updates and queue
    /// redelivery after a lost lease reuse the same write path. `Pending`
    /// has no predecessors: it is only ever written on creation.
    pub fn allowed_predecessors(self) -> &'static [TaskStatus] {
        match self {
            TaskStatus::Pending => &[],
            TaskStatus::Running => &[TaskStatus::Pending, TaskStatus::Running],
            TaskStatus::Completed | TaskStatus::Failed => &[TaskStatus::Running],
            TaskStatus::Canceled => &[TaskStatus::Pending, TaskStatus::Running],
        }
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        next.allowed_predecessors().contains(&self)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CoreError::Internal(format!("unknown task status '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Parameters for the Monte-Carlo estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct TaskParams {
    #[validate(range(min = 1, message = "iterations must be a positive integer"))]
    pub iterations: u64,
}

impl TaskParams {
    /// Validate against the static rules and the deployment's size ceiling.
    pub fn validate_with_ceiling(&self, max_iterations: u64) -> Result<(), CoreError> {
        self.validate()
            .map_err(|e| CoreError::Validation(e.to_string()))?;
        if self.iterations > max_iterations {
            return Err(CoreError::Validation(format!(
                "iterations must not exceed {max_iterations}"
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Message stored on tasks canceled through the API.
pub const CANCELED_BY_USER: &str = "Canceled by user";

/// Terminal payload. The `kind` tag identifies the shape; new shapes get a
/// new kind rather than changing an existing one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskResult {
    Estimate { value: f64, iterations: u64 },
    Error { message: String },
    Canceled { reason: String },
}

impl TaskResult {
    pub fn error(message: impl Into<String>) -> Self {
        TaskResult::Error {
            message: message.into(),
        }
    }

    pub fn canceled_by_user() -> Self {
        TaskResult::Canceled {
            reason: CANCELED_BY_USER.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn pending_can_start_or_cancel() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Canceled));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Failed));
    }

    #[test]
    fn running_reaches_every_terminal_status() {
        for next in [
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Canceled,
        ] {
            assert!(TaskStatus::Running.can_transition_to(next), "{next}");
        }
    }

    #[test]
    fn nothing_leaves_a_terminal_status() {
        for from in TaskStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in TaskStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn nothing_returns_to_pending() {
        for from in TaskStatus::ALL {
            assert!(!from.can_transition_to(TaskStatus::Pending));
        }
    }

    #[test]
    fn status_string_round_trip() {
        for status in TaskStatus::ALL {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert_matches!("DONE".parse::<TaskStatus>(), Err(CoreError::Internal(_)));
    }

    #[test]
    fn zero_iterations_is_invalid() {
        let params = TaskParams { iterations: 0 };
        assert_matches!(
            params.validate_with_ceiling(1_000),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn ceiling_is_inclusive() {
        assert!(TaskParams { iterations: 1_000 }
            .validate_with_ceiling(1_000)
            .is_ok());
        assert_matches!(
            TaskParams { iterations: 1_001 }.validate_with_ceiling(1_000),
            Err(CoreError::Validation(msg)) if msg.contains("1000")
        );
    }

    #[test]
    fn result_is_tagged_by_kind() {
        let json = serde_json::to_value(TaskResult::Estimate {
            value: 3.14,
            iterations: 10,
        })
        .unwrap();
        assert_eq!(json["kind"], "estimate");
        assert_eq!(json["iterations"], 10);

        let json = serde_json::to_value(TaskResult::canceled_by_user()).unwrap();
        assert_eq!(json["kind"], "canceled");
        assert_eq!(json["reason"], CANCELED_BY_USER);
    }
}
