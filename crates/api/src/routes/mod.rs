pub mod auth;
pub mod health;
pub mod tasks;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /ws                        WebSocket (token in query string)
///
/// /auth/register             register (public)
/// /auth/login                login (public)
///
/// /tasks                     list, submit
/// /tasks/{id}                get, cancel (DELETE)
/// /tasks/{id}/cancel         cancel (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .nest("/auth", auth::router())
        .nest("/tasks", tasks::router())
}
