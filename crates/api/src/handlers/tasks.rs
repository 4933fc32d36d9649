//! Handlers for the `/tasks` resource.
//!
//! All endpoints require authentication via [`AuthUser`]. Users only ever
//! see their own tasks; another user's task id yields 404.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use taskforge_core::error::CoreError;
use taskforge_core::task::TaskParams;
use taskforge_core::types::TaskId;

use crate::error::{AppError, AppResult};
use crate::extract::ApiJson;
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

/// Parse a task id from the path. A malformed id cannot name an existing
/// task, so it is reported as not found.
fn parse_task_id(raw: &str) -> Result<TaskId, AppError> {
    raw.parse::<TaskId>()
        .map_err(|_| AppError::Core(CoreError::task_not_found(raw)))
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/tasks
///
/// Submit `{iterations}`. Returns 202 with the PENDING task; progress then
/// arrives over the WebSocket. 400 for an invalid or oversized workload,
/// 429 when the caller already holds the maximum number of active tasks.
pub async fn submit_task(
    auth: AuthUser,
    State(state): State<AppState>,
    ApiJson(params): ApiJson<TaskParams>,
) -> AppResult<impl IntoResponse> {
    let task = state.tasks.submit(auth.user_id, params).await?;
    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: task })))
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

/// GET /api/v1/tasks
///
/// The caller's tasks, newest first.
pub async fn list_tasks(
    auth: AuthUser,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let tasks = state.tasks.list(auth.user_id).await?;
    Ok(Json(DataResponse { data: tasks }))
}

/// GET /api/v1/tasks/{id}
pub async fn get_task(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let task = state.tasks.get(auth.user_id, parse_task_id(&id)?).await?;
    Ok(Json(DataResponse { data: task }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// DELETE /api/v1/tasks/{id}, POST /api/v1/tasks/{id}/cancel
///
/// Cancel a PENDING or RUNNING task. Returns 200 with the CANCELED task,
/// 409 if the task already finished.
pub async fn cancel_task(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let task = state.tasks.cancel(auth.user_id, parse_task_id(&id)?).await?;
    Ok(Json(DataResponse { data: task }))
}
