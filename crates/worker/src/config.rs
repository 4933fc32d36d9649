use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use taskforge_core::workload::MonteCarloPi;

use crate::compute::COMPUTE_SUBCOMMAND;
use crate::context::Substrate;
use crate::coordinator::CoordinatorSettings;

/// Where execution contexts run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubstrateKind {
    /// A child process per task, killed on termination.
    Subprocess,
    /// A blocking thread per task, stopped at its next progress report.
    Thread,
}

impl FromStr for SubstrateKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "subprocess" | "process" => Ok(SubstrateKind::Subprocess),
            "thread" => Ok(SubstrateKind::Thread),
            other => Err(format!("unknown execution substrate '{other}'")),
        }
    }
}

fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|e| panic!("{key} is invalid: {e}")),
        Err(_) => default,
    }
}

/// Worker process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    /// Bus URL; unset means the in-process bus.
    pub bus_url: Option<String>,
    pub worker_id: String,
    pub concurrency: usize,
    pub substrate: SubstrateKind,
    /// Program run by the subprocess substrate (default: this executable).
    pub compute_program: Option<PathBuf>,
    pub poll_interval: Duration,
    pub lease: Duration,
    pub max_attempts: i64,
    pub busy_timeout: Duration,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default          |
    /// |--------------------------|------------------|
    /// | `DATABASE_URL`           | required         |
    /// | `BUS_URL`                | unset (local)    |
    /// | `WORKER_ID`              | `worker-<pid>`   |
    /// | `WORKER_CONCURRENCY`     | `1`              |
    /// | `EXECUTION_SUBSTRATE`    | `subprocess`     |
    /// | `COMPUTE_PROGRAM`        | current exe      |
    /// | `QUEUE_POLL_INTERVAL_MS` | `500`            |
    /// | `QUEUE_LEASE_SECS`       | `30`             |
    /// | `QUEUE_MAX_ATTEMPTS`     | `3`              |
    /// | `DB_BUSY_TIMEOUT_MS`     | `5000`           |
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let bus_url = std::env::var("BUS_URL").ok().filter(|s| !s.trim().is_empty());
        let worker_id = std::env::var("WORKER_ID")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("worker-{}", std::process::id()));

        let concurrency: usize = env_or("WORKER_CONCURRENCY", 1);
        assert!(concurrency > 0, "WORKER_CONCURRENCY must be at least 1");

        Self {
            database_url,
            bus_url,
            worker_id,
            concurrency,
            substrate: env_or("EXECUTION_SUBSTRATE", SubstrateKind::Subprocess),
            compute_program: std::env::var("COMPUTE_PROGRAM").ok().map(PathBuf::from),
            poll_interval: Duration::from_millis(env_or("QUEUE_POLL_INTERVAL_MS", 500)),
            lease: Duration::from_secs(env_or("QUEUE_LEASE_SECS", 30)),
            max_attempts: env_or("QUEUE_MAX_ATTEMPTS", 3),
            busy_timeout: Duration::from_millis(env_or("DB_BUSY_TIMEOUT_MS", 5000)),
        }
    }

    pub fn settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            worker_id: self.worker_id.clone(),
            concurrency: self.concurrency,
            poll_interval: self.poll_interval,
            lease: self.lease,
            max_attempts: self.max_attempts,
        }
    }

    /// Build the configured substrate.
    pub fn build_substrate(&self) -> std::io::Result<Substrate> {
        Ok(match self.substrate {
            SubstrateKind::Thread => Substrate::Thread {
                workload: Arc::new(MonteCarloPi::default()),
            },
            SubstrateKind::Subprocess => Substrate::Subprocess {
                program: match &self.compute_program {
                    Some(program) => program.clone(),
                    None => std::env::current_exe()?,
                },
                args: vec![COMPUTE_SUBCOMMAND.to_string()],
            },
        })
    }
}
