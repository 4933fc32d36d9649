#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use taskforge_api::auth::jwt::JwtConfig;
use taskforge_api::config::ServerConfig;
use taskforge_api::router::build_app_router;
use taskforge_api::state::AppState;
use taskforge_api::ws::WsManager;
use taskforge_core::admission::AdmissionLimits;
use taskforge_core::types::DbId;
use taskforge_db::DbPool;
use taskforge_events::{LocalBus, TaskBus};
use tempfile::TempDir;
use tower::ServiceExt;

pub const PASSWORD: &str = "correct-horse";

/// Build a test `ServerConfig` with safe defaults and a cap of 5 active
/// tasks per user.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        bus_url: None,
        busy_timeout: Duration::from_secs(5),
        admission: AdmissionLimits {
            max_concurrent_per_user: 5,
            max_iterations: 1_000_000_000,
        },
        embedded_coordinators: 0,
        jwt: JwtConfig {
            secret: "test-secret-that-is-long-enough-for-hmac".to_string(),
            access_token_expiry_mins: 15,
        },
    }
}

/// A gateway over a fresh SQLite file and an in-process bus.
pub struct TestApp {
    pub _dir: TempDir,
    pub pool: DbPool,
    pub bus: Arc<dyn TaskBus>,
    pub ws_manager: Arc<WsManager>,
    pub router: Router,
}

impl TestApp {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("api.db").display());
        let pool = taskforge_db::create_pool(&url).await.expect("pool");
        taskforge_db::run_migrations(&pool).await.expect("migrations");

        let bus: Arc<dyn TaskBus> = Arc::new(LocalBus::default());
        let ws_manager = Arc::new(WsManager::new());
        let state = AppState::new(
            pool.clone(),
            test_config(),
            Arc::clone(&ws_manager),
            Arc::clone(&bus),
        );

        Self {
            _dir: dir,
            pool,
            bus,
            ws_manager,
            router: build_app_router(state),
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    pub async fn get(&self, uri: &str, token: &str) -> Response {
        self.send(authed(Request::get(uri), token).body(Body::empty()).unwrap())
            .await
    }

    pub async fn post_json(&self, uri: &str, token: Option<&str>, body: Value) -> Response {
        let mut builder = Request::post(uri).header("content-type", "application/json");
        if let Some(token) = token {
            builder = authed(builder, token);
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    pub async fn delete(&self, uri: &str, token: &str) -> Response {
        self.send(
            authed(Request::delete(uri), token)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    /// Register `username` and return `(user_id, access_token)`.
    pub async fn register(&self, username: &str) -> (DbId, String) {
        let response = self
            .post_json(
                "/api/v1/auth/register",
                None,
                serde_json::json!({ "username": username, "password": PASSWORD }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        (
            json["user"]["id"].as_i64().expect("user id"),
            json["access_token"].as_str().expect("token").to_string(),
        )
    }

    /// Submit a task and return its JSON representation.
    pub async fn submit(&self, token: &str, iterations: u64) -> Value {
        let response = self
            .post_json(
                "/api/v1/tasks",
                Some(token),
                serde_json::json!({ "iterations": iterations }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        body_json(response).await["data"].clone()
    }
}

fn authed(builder: axum::http::request::Builder, token: &str) -> axum::http::request::Builder {
    builder.header("authorization", format!("Bearer {token}"))
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("JSON body")
}

/// Assert an error response's status and `code`.
pub async fn assert_error(response: Response, status: StatusCode, code: &str) {
    assert_eq!(response.status(), status);
    let json = body_json(response).await;
    assert_eq!(json["code"], code, "unexpected error body: {json}");
}
