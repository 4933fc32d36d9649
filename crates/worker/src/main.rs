use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use taskforge_core::workload::{MonteCarloPi, MIN_PROGRESS_STRIDE};
use taskforge_worker::compute::run_compute;
use taskforge_worker::{Coordinator, WorkerConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long running tasks get to wind down after a shutdown signal.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "taskforge-worker", version, about = "Task execution worker")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Claim and execute queued tasks until stopped (default).
    Run,
    /// Execute one task read from stdin, reporting JSON lines on stdout.
    Compute {
        /// Minimum iterations between progress reports.
        #[arg(long, default_value_t = MIN_PROGRESS_STRIDE, hide = true)]
        min_stride: u64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Run) {
        Command::Compute { min_stride } => {
            // stdout is the event channel; logs go to stderr.
            init_tracing(io::stderr);
            let workload = MonteCarloPi::with_min_stride(min_stride);
            run_compute(&workload, io::stdin().lock(), io::stdout().lock())
                .context("Failed to report compute output")
        }
        Command::Run => {
            dotenvy::dotenv().ok();
            init_tracing(io::stdout);
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to build Tokio runtime")?
                .block_on(run_worker())
        }
    }
}

fn init_tracing<W>(writer: W)
where
    W: for<'w> tracing_subscriber::fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskforge_worker=debug,taskforge_events=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(writer))
        .init();
}

async fn run_worker() -> anyhow::Result<()> {
    // --- Configuration ---
    let config = WorkerConfig::from_env();
    tracing::info!(
        worker_id = %config.worker_id,
        concurrency = config.concurrency,
        substrate = ?config.substrate,
        "Loaded worker configuration",
    );

    // --- Database ---
    let pool = taskforge_db::create_pool_with_timeout(&config.database_url, config.busy_timeout)
        .await
        .context("Failed to connect to database")?;
    taskforge_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database ready");

    // --- Bus ---
    if config.bus_url.is_none() {
        tracing::warn!("BUS_URL not set; this worker cannot exchange events with other processes");
    }
    let bus = taskforge_events::connect(config.bus_url.as_deref())
        .await
        .context("Failed to connect to bus")?;

    // --- Coordinator ---
    let substrate = config
        .build_substrate()
        .context("Failed to resolve compute program")?;
    let coordinator = Arc::new(Coordinator::new(pool.clone(), bus, substrate, config.settings()));

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(Arc::clone(&coordinator).run(shutdown.clone()));

    shutdown_signal().await;
    shutdown.cancel();

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
        Ok(_) => tracing::info!("Coordinator stopped"),
        Err(_) => tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Coordinator did not stop in time"
        ),
    }

    pool.close().await;
    tracing::info!("Worker shut down");
    Ok(())
}

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
