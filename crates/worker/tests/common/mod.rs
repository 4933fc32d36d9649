#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use taskforge_core::events::TaskUpdate;
use taskforge_core::task::{TaskParams, TaskResult, TaskStatus};
use taskforge_core::types::{new_task_id, DbId, TaskId};
use taskforge_core::workload::{Checkpoint, ProgressSink, Workload, WorkloadError};
use taskforge_db::models::task::{CreateTask, Task};
use taskforge_db::models::user::CreateUser;
use taskforge_db::repositories::{Submission, TaskRepo, UserRepo};
use taskforge_db::DbPool;
use taskforge_events::{BusStream, LocalBus, TaskBus};
use taskforge_worker::{Coordinator, CoordinatorSettings, Substrate};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub const WAIT: Duration = Duration::from_secs(10);

pub struct Harness {
    pub _dir: TempDir,
    pub pool: DbPool,
    pub bus: Arc<dyn TaskBus>,
    pub owner: DbId,
}

impl Harness {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("worker.db").display());
        let pool = taskforge_db::create_pool(&url).await.expect("pool");
        taskforge_db::run_migrations(&pool).await.expect("migrations");
        let owner = UserRepo::create(
            &pool,
            &CreateUser {
                username: "alice".into(),
                password_hash: "x".into(),
            },
        )
        .await
        .expect("user")
        .id;

        Self {
            _dir: dir,
            pool,
            bus: Arc::new(LocalBus::default()),
            owner,
        }
    }

    pub async fn submit(&self, iterations: u64) -> Task {
        let input = CreateTask {
            id: new_task_id(),
            owner_id: self.owner,
            params: TaskParams { iterations },
        };
        match TaskRepo::submit(&self.pool, &input, 100).await.expect("submit") {
            Submission::Accepted(task) => task,
            other => panic!("submission rejected: {other:?}"),
        }
    }

    pub fn coordinator(&self, worker_id: &str, workload: impl Workload) -> Arc<Coordinator> {
        self.coordinator_with(worker_id, workload, |_| {})
    }

    pub fn coordinator_with(
        &self,
        worker_id: &str,
        workload: impl Workload,
        tweak: impl FnOnce(&mut CoordinatorSettings),
    ) -> Arc<Coordinator> {
        let substrate = Substrate::Thread {
            workload: Arc::new(workload),
        };
        self.coordinator_on(worker_id, substrate, tweak)
    }

    pub fn coordinator_on(
        &self,
        worker_id: &str,
        substrate: Substrate,
        tweak: impl FnOnce(&mut CoordinatorSettings),
    ) -> Arc<Coordinator> {
        let mut settings = CoordinatorSettings::new(worker_id);
        settings.poll_interval = Duration::from_millis(10);
        tweak(&mut settings);
        Arc::new(Coordinator::new(
            self.pool.clone(),
            Arc::clone(&self.bus),
            substrate,
            settings,
        ))
    }

    pub async fn task(&self, id: TaskId) -> Task {
        TaskRepo::find_by_id(&self.pool, id)
            .await
            .expect("query")
            .expect("task exists")
    }

    /// Poll the store until `done` holds for the task.
    pub async fn wait_for(&self, id: TaskId, done: impl Fn(&Task) -> bool) -> Task {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let task = self.task(id).await;
            if done(&task) {
                return task;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting on task {id}, last seen {:?} at {}%",
                task.status,
                task.progress
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn updates(&self) -> BusStream<TaskUpdate> {
        self.bus.subscribe_updates().await.expect("subscribe")
    }
}

/// Start `coordinator` in the background; cancel the token to stop it.
pub fn spawn(coordinator: &Arc<Coordinator>) -> (CancellationToken, tokio::task::JoinHandle<()>) {
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(Arc::clone(coordinator).run(shutdown.clone()));
    (shutdown, handle)
}

/// Collect updates for `task_id` until one matches `last`.
pub async fn collect_until(
    stream: &mut BusStream<TaskUpdate>,
    task_id: TaskId,
    last: impl Fn(&TaskUpdate) -> bool,
) -> Vec<TaskUpdate> {
    let mut seen = Vec::new();
    loop {
        let update = tokio::time::timeout(WAIT, stream.next())
            .await
            .expect("timed out waiting for update")
            .expect("bus closed");
        if update.task_id != task_id {
            continue;
        }
        let done = last(&update);
        seen.push(update);
        if done {
            return seen;
        }
    }
}

/// Poll `check` until it returns true.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check().await {
        assert!(tokio::time::Instant::now() < deadline, "condition never held");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ---------------------------------------------------------------------------
// Workloads
// ---------------------------------------------------------------------------

/// Reports `steps` progress points, sleeping `step` before each one.
pub struct Stepper {
    pub steps: u32,
    pub step: Duration,
}

impl Stepper {
    /// Long enough to be caught mid-flight by any test.
    pub fn slow() -> Self {
        Self {
            steps: 10_000,
            step: Duration::from_millis(5),
        }
    }
}

impl Workload for Stepper {
    fn name(&self) -> &'static str {
        "stepper"
    }

    fn run(
        &self,
        params: &TaskParams,
        progress: &mut dyn ProgressSink,
    ) -> Result<TaskResult, WorkloadError> {
        for i in 1..self.steps {
            std::thread::sleep(self.step);
            let percent = (u64::from(i) * 100 / u64::from(self.steps)) as u8;
            if progress.report(percent) == Checkpoint::Stop {
                return Err(WorkloadError::Interrupted);
            }
        }
        Ok(TaskResult::Estimate {
            value: 3.0,
            iterations: params.iterations,
        })
    }
}

/// Fails after reporting some progress.
pub struct AlwaysFails;

impl Workload for AlwaysFails {
    fn name(&self) -> &'static str {
        "always_fails"
    }

    fn run(
        &self,
        _params: &TaskParams,
        progress: &mut dyn ProgressSink,
    ) -> Result<TaskResult, WorkloadError> {
        progress.report(30);
        Err(WorkloadError::Failed("sampler exploded".into()))
    }
}

pub fn is_terminal(update: &TaskUpdate) -> bool {
    update.status.is_terminal()
}

pub fn assert_status(task: &Task, status: TaskStatus) {
    assert_eq!(task.status, status, "task {} in unexpected status", task.id);
}
