/// User primary keys are SQLite INTEGER rowids.
pub type DbId = i64;

/// Task ids are UUIDv7, so they sort by creation time.
pub type TaskId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Generate a fresh, time-ordered task id.
pub fn new_task_id() -> TaskId {
    uuid::Uuid::now_v7()
}
