use std::sync::Arc;

use taskforge_events::TaskBus;

use crate::config::ServerConfig;
use crate::gateway::TaskService;
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything inside is behind `Arc` or already `Clone`.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: taskforge_db::DbPool,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// WebSocket connections of signed-in users.
    pub ws_manager: Arc<WsManager>,
    /// Progress and cancellation bus.
    pub bus: Arc<dyn TaskBus>,
    /// Submission, query and cancellation of tasks.
    pub tasks: TaskService,
}

impl AppState {
    pub fn new(
        pool: taskforge_db::DbPool,
        config: ServerConfig,
        ws_manager: Arc<WsManager>,
        bus: Arc<dyn TaskBus>,
    ) -> Self {
        let tasks = TaskService::new(pool.clone(), Arc::clone(&bus), config.admission);
        Self {
            pool,
            config: Arc::new(config),
            ws_manager,
            bus,
            tasks,
        }
    }
}
