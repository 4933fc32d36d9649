use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use taskforge_core::workload::MonteCarloPi;
use taskforge_worker::{Coordinator, CoordinatorSettings, Substrate};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use taskforge_api::config::ServerConfig;
use taskforge_api::gateway::UpdateRelay;
use taskforge_api::router::build_app_router;
use taskforge_api::state::AppState;
use taskforge_api::ws;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "taskforge_api=debug,taskforge_worker=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

    let pool = taskforge_db::create_pool_with_timeout(&database_url, config.busy_timeout)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    taskforge_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    taskforge_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    // --- Bus ---
    if config.bus_url.is_none() && config.embedded_coordinators == 0 {
        tracing::warn!(
            "No BUS_URL and no embedded coordinators: tasks will queue but nothing will run them"
        );
    }
    let bus = taskforge_events::connect(config.bus_url.as_deref())
        .await
        .context("Failed to connect to bus")?;

    // --- WebSocket manager ---
    let ws_manager = Arc::new(ws::WsManager::new());
    let background = CancellationToken::new();
    let heartbeat_handle = ws::start_heartbeat(
        Arc::clone(&ws_manager),
        ws::HEARTBEAT_INTERVAL,
        background.clone(),
    );

    // --- Update relay ---
    let relay = UpdateRelay::new(Arc::clone(&bus), Arc::clone(&ws_manager));
    let relay_handle = tokio::spawn(relay.run(background.clone()));

    // --- Embedded coordinators ---
    let mut coordinator_handles = Vec::with_capacity(config.embedded_coordinators);
    for i in 0..config.embedded_coordinators {
        let settings = CoordinatorSettings::new(format!("gateway-{}-{i}", std::process::id()));
        let coordinator = Arc::new(Coordinator::new(
            pool.clone(),
            Arc::clone(&bus),
            Substrate::Thread {
                workload: Arc::new(MonteCarloPi::default()),
            },
            settings,
        ));
        coordinator_handles.push(tokio::spawn(coordinator.run(background.clone())));
    }
    if !coordinator_handles.is_empty() {
        tracing::info!(count = coordinator_handles.len(), "Embedded coordinators started");
    }

    // --- App state ---
    let shutdown_timeout = Duration::from_secs(config.shutdown_timeout_secs);
    let addr = SocketAddr::new(
        config.host.parse().context("Invalid HOST address")?,
        config.port,
    );
    let state = AppState::new(pool.clone(), config, Arc::clone(&ws_manager), bus);
    let app = build_app_router(state);

    // --- Start server ---
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    background.cancel();
    for handle in coordinator_handles {
        if tokio::time::timeout(shutdown_timeout, handle).await.is_err() {
            tracing::warn!("Embedded coordinator did not stop in time");
        }
    }
    let _ = tokio::time::timeout(Duration::from_secs(5), relay_handle).await;
    tracing::info!("Background services stopped");

    let ws_count = ws_manager.connection_count().await;
    tracing::info!(ws_count, "Closing remaining WebSocket connections");
    ws_manager.shutdown_all().await;

    let _ = heartbeat_handle.await;
    pool.close().await;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
