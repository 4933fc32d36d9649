//! Worker pool coordinator.
//!
//! Claims jobs from the queue with bounded concurrency and drives each one
//! through its execution context:
//!
//! 1. write RUNNING (accepted only from PENDING or RUNNING) and publish;
//! 2. start the context and register it in the [`AssignmentRegistry`];
//! 3. persist and publish every progress report;
//! 4. persist the terminal status, publish, deregister and ack.
//!
//! A separate listener consumes cancellation requests and terminates the
//! matching context if, and only if, it runs here. A progress write that
//! the store rejects (the task was canceled meanwhile) stops the context
//! too, so a missed broadcast costs at most one progress interval.
//!
//! The job is acked only once the task's terminal status is in the store.
//! A failed terminal write releases the job for redelivery, and a lost
//! lease stops the context without touching the job at all.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use taskforge_core::events::CancelRequest;
use taskforge_core::types::TaskId;
use taskforge_db::models::job::ClaimedJob;
use taskforge_db::models::task::{StatusChange, StatusUpdate, Task};
use taskforge_db::repositories::{JobQueueRepo, TaskRepo};
use taskforge_db::DbPool;
use taskforge_events::{BusStream, TaskBus};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::context::{ExecEvent, ExecutionContext, ExecutionHandle, Exit, Substrate};
use crate::registry::AssignmentRegistry;

/// Delay before re-subscribing after the cancel subscription dropped.
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Lower bound on the lease renewal period.
const MIN_RENEW_INTERVAL: Duration = Duration::from_millis(100);

/// Result message for a crashed context. Crash details only go to the log.
const CRASH_MESSAGE: &str = "Execution failed unexpectedly";

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub worker_id: String,
    /// Maximum number of tasks executing at once.
    pub concurrency: usize,
    /// Queue poll period while idle.
    pub poll_interval: Duration,
    /// Claim lease, renewed while the task runs.
    pub lease: Duration,
    /// Deliveries after which a task is failed as abandoned.
    pub max_attempts: i64,
}

impl CoordinatorSettings {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            concurrency: 1,
            poll_interval: Duration::from_millis(500),
            lease: Duration::from_secs(30),
            max_attempts: 3,
        }
    }
}

pub struct Coordinator {
    pool: DbPool,
    bus: Arc<dyn TaskBus>,
    substrate: Substrate,
    settings: CoordinatorSettings,
    registry: Arc<AssignmentRegistry>,
}

impl Coordinator {
    pub fn new(
        pool: DbPool,
        bus: Arc<dyn TaskBus>,
        substrate: Substrate,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            pool,
            bus,
            substrate,
            settings,
            registry: Arc::new(AssignmentRegistry::new()),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.settings.worker_id
    }

    pub fn registry(&self) -> Arc<AssignmentRegistry> {
        Arc::clone(&self.registry)
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// On shutdown, running contexts are terminated and their jobs handed
    /// back to the queue for another worker.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        // Subscribe before claiming anything, so no cancellation for a task
        // we start can slip past.
        let cancels = match self.bus.subscribe_cancels().await {
            Ok(stream) => Some(stream),
            Err(e) => {
                tracing::error!(error = %e, "Cancel subscription failed, will retry");
                None
            }
        };
        let listener = tokio::spawn(Arc::clone(&self).listen_for_cancels(cancels, shutdown.clone()));

        tracing::info!(
            worker_id = %self.settings.worker_id,
            concurrency = self.settings.concurrency,
            poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
            "Coordinator started",
        );

        let slots = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut running = JoinSet::new();

        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = Arc::clone(&slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let Some(claimed) = self.next_job(&shutdown).await else {
                break;
            };

            let this = Arc::clone(&self);
            running.spawn(async move {
                this.process(claimed).await;
                drop(permit);
            });

            while running.try_join_next().is_some() {}
        }

        let signalled = self.registry.terminate_all().await;
        tracing::info!(
            worker_id = %self.settings.worker_id,
            running = signalled,
            "Coordinator shutting down",
        );
        while running.join_next().await.is_some() {}
        listener.abort();
    }

    /// Poll the queue until a job is claimed or shutdown is requested.
    async fn next_job(&self, shutdown: &CancellationToken) -> Option<ClaimedJob> {
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = ticker.tick() => {}
            }

            match JobQueueRepo::claim_next(&self.pool, &self.settings.worker_id, self.settings.lease)
                .await
            {
                Ok(Some(claimed)) => return Some(claimed),
                Ok(None) => {}
                Err(e) if taskforge_db::is_transient(&e) => {
                    tracing::debug!(error = %e, "Queue busy, retrying");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to claim job");
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Job lifecycle
    // -----------------------------------------------------------------------

    /// Drive one claimed job to completion. Never panics on task errors.
    pub async fn process(&self, claimed: ClaimedJob) {
        let job = claimed.job;
        let task_id = job.task_id;
        let worker_id = self.settings.worker_id.as_str();

        if claimed.attempts > self.settings.max_attempts {
            tracing::warn!(
                %task_id,
                attempts = claimed.attempts,
                "Job exceeded delivery attempts, failing as abandoned",
            );
            let message = format!(
                "Execution abandoned after {} attempts",
                self.settings.max_attempts
            );
            // FAILED is only reachable from RUNNING; a task that never got
            // that far is moved there first.
            match TaskRepo::update_status(&self.pool, task_id, &StatusChange::running(0, worker_id))
                .await
            {
                Ok(StatusUpdate::Applied(_)) => {}
                Ok(StatusUpdate::Rejected { current }) => {
                    tracing::info!(%task_id, status = %current, "Abandoned job's task already finished");
                    self.ack(task_id).await;
                    return;
                }
                Ok(StatusUpdate::NotFound) => {
                    tracing::warn!(%task_id, "Abandoned job for unknown task");
                    self.ack(task_id).await;
                    return;
                }
                Err(e) => {
                    tracing::error!(%task_id, error = %e, "Failed to mark abandoned task running, releasing job");
                    self.release(task_id).await;
                    return;
                }
            }
            let persisted = self.finish(task_id, StatusChange::failed(message)).await;
            self.settle(task_id, persisted).await;
            return;
        }

        match TaskRepo::update_status(&self.pool, task_id, &StatusChange::running(0, worker_id)).await
        {
            Ok(StatusUpdate::Applied(task)) => {
                tracing::info!(%task_id, owner_id = task.owner_id, worker_id, "Task started");
                self.publish(&task).await;
            }
            Ok(StatusUpdate::Rejected { current }) => {
                tracing::info!(%task_id, status = %current, "Skipping job, task no longer runnable");
                self.ack(task_id).await;
                return;
            }
            Ok(StatusUpdate::NotFound) => {
                tracing::warn!(%task_id, "Skipping job for unknown task");
                self.ack(task_id).await;
                return;
            }
            Err(e) => {
                tracing::error!(%task_id, error = %e, "Failed to mark task running, releasing job");
                self.release(task_id).await;
                return;
            }
        }

        let handle = match ExecutionContext::start(&self.substrate, &job).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(%task_id, error = %e, "Execution context failed to start");
                let persisted = self.finish(task_id, StatusChange::failed(CRASH_MESSAGE)).await;
                self.settle(task_id, persisted).await;
                return;
            }
        };

        self.registry
            .register(task_id, job.owner_id, handle.terminator())
            .await;
        // A cancellation that arrived between the RUNNING write and the
        // registration found nothing to terminate; catch it here.
        if let Ok(Some(task)) = TaskRepo::find_by_id(&self.pool, task_id).await {
            if task.status.is_terminal() {
                handle.terminate();
            }
        }
        let stop_renewal = CancellationToken::new();
        let lease_lost = CancellationToken::new();
        let renewal = self.spawn_lease_renewal(
            task_id,
            handle.terminator(),
            lease_lost.clone(),
            stop_renewal.clone(),
        );

        let (exit, persisted) = self.supervise(handle, &lease_lost).await;

        stop_renewal.cancel();
        let _ = renewal.await;
        self.registry.deregister(task_id).await;

        if lease_lost.is_cancelled() {
            // The job belongs to whoever claimed it after us.
            tracing::warn!(%task_id, exit = ?exit, "Execution stopped after losing the lease");
            return;
        }

        match exit {
            Exit::Finished => self.settle(task_id, persisted).await,
            Exit::Crashed(detail) => {
                tracing::error!(%task_id, detail = %detail, "Execution context crashed");
                let persisted = self.finish(task_id, StatusChange::failed(CRASH_MESSAGE)).await;
                self.settle(task_id, persisted).await;
            }
            Exit::Terminated => self.settle_terminated(task_id).await,
        }
    }

    /// Forward context events to the store and the bus until the context
    /// ends, then report how it ended and whether its terminal status
    /// reached the store.
    ///
    /// Once `lease_lost` fires the remaining events are drained unwritten.
    async fn supervise(
        &self,
        mut handle: ExecutionHandle,
        lease_lost: &CancellationToken,
    ) -> (Exit, bool) {
        let task_id = handle.task_id();
        let worker_id = self.settings.worker_id.as_str();
        let mut persisted = true;

        while let Some(event) = handle.next_event().await {
            if lease_lost.is_cancelled() {
                continue;
            }
            match event {
                ExecEvent::Progress(percent) => {
                    let change = StatusChange::running(percent, worker_id);
                    match TaskRepo::update_status(&self.pool, task_id, &change).await {
                        Ok(StatusUpdate::Applied(task)) => {
                            tracing::debug!(%task_id, progress = task.progress, "Progress");
                            self.publish(&task).await;
                        }
                        Ok(StatusUpdate::Rejected { current }) => {
                            tracing::info!(%task_id, status = %current, "Task no longer running, stopping execution");
                            handle.terminate();
                        }
                        Ok(StatusUpdate::NotFound) => {
                            tracing::warn!(%task_id, "Task disappeared, stopping execution");
                            handle.terminate();
                        }
                        Err(e) => {
                            tracing::warn!(%task_id, error = %e, "Failed to persist progress");
                        }
                    }
                }
                ExecEvent::Completed(result) => {
                    tracing::info!(%task_id, "Task completed");
                    persisted = self.finish(task_id, StatusChange::completed(result)).await;
                }
                ExecEvent::Failed(message) => {
                    tracing::warn!(%task_id, error = %message, "Workload failed");
                    persisted = self.finish(task_id, StatusChange::failed(message)).await;
                }
            }
        }

        (handle.wait().await, persisted)
    }

    /// Ack a job whose terminal status is settled in the store. A job whose
    /// terminal write failed goes back to the queue instead: the task is
    /// still RUNNING there and only a redelivery can finish it.
    async fn settle(&self, task_id: TaskId, persisted: bool) {
        if persisted {
            self.ack(task_id).await;
        } else {
            tracing::warn!(%task_id, "Terminal status not persisted, releasing job for redelivery");
            self.release(task_id).await;
        }
    }

    /// A terminated task whose status is already terminal is done. One that
    /// is still active was stopped by shutdown and goes back to the queue.
    async fn settle_terminated(&self, task_id: TaskId) {
        match TaskRepo::find_by_id(&self.pool, task_id).await {
            Ok(Some(task)) if task.status.is_active() => {
                tracing::info!(%task_id, "Execution interrupted by shutdown, releasing job");
                self.release(task_id).await;
            }
            Ok(_) => {
                tracing::info!(%task_id, "Execution terminated");
                self.ack(task_id).await;
            }
            Err(e) => {
                // Leave the claim to expire; the next holder re-checks the status.
                tracing::warn!(%task_id, error = %e, "Could not read task after termination");
            }
        }
    }

    /// Write a terminal status and publish it if it was accepted.
    ///
    /// Returns `false` only when the store could not be written. A rejected
    /// write means another terminal status already won, which settles the
    /// task just as well.
    async fn finish(&self, task_id: TaskId, change: StatusChange) -> bool {
        match TaskRepo::update_status(&self.pool, task_id, &change).await {
            Ok(StatusUpdate::Applied(task)) => {
                self.publish(&task).await;
                true
            }
            Ok(StatusUpdate::Rejected { current }) => {
                tracing::info!(%task_id, status = %current, wanted = %change.status, "Terminal write rejected");
                true
            }
            Ok(StatusUpdate::NotFound) => {
                tracing::warn!(%task_id, "Terminal write for unknown task");
                true
            }
            Err(e) => {
                tracing::error!(%task_id, error = %e, "Failed to persist terminal status");
                false
            }
        }
    }

    async fn publish(&self, task: &Task) {
        if let Err(e) = self.bus.publish_update(&task.to_update()).await {
            tracing::warn!(task_id = %task.id, error = %e, "Failed to publish task update");
        }
    }

    async fn ack(&self, task_id: TaskId) {
        match JobQueueRepo::ack(&self.pool, task_id, &self.settings.worker_id).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(%task_id, "Ack found no claim, lease was lost"),
            Err(e) => tracing::error!(%task_id, error = %e, "Failed to ack job"),
        }
    }

    async fn release(&self, task_id: TaskId) {
        if let Err(e) = JobQueueRepo::release(&self.pool, task_id, &self.settings.worker_id).await {
            tracing::error!(%task_id, error = %e, "Failed to release job");
        }
    }

    /// Keep the claim alive while the context runs.
    ///
    /// If the claim turns out to be gone, another worker may already be
    /// running the task: `lease_lost` is fired and the context terminated.
    fn spawn_lease_renewal(
        &self,
        task_id: TaskId,
        terminate: CancellationToken,
        lease_lost: CancellationToken,
        stop: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let pool = self.pool.clone();
        let worker_id = self.settings.worker_id.clone();
        let lease = self.settings.lease;
        let period = (lease / 3).max(MIN_RENEW_INTERVAL);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        match JobQueueRepo::renew_lease(&pool, task_id, &worker_id, lease).await {
                            Ok(true) => {}
                            Ok(false) => {
                                tracing::warn!(%task_id, worker_id = %worker_id, "Lease lost while running, stopping execution");
                                lease_lost.cancel();
                                terminate.cancel();
                                break;
                            }
                            Err(e) => tracing::warn!(%task_id, error = %e, "Lease renewal failed"),
                        }
                    }
                }
            }
        })
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    async fn listen_for_cancels(
        self: Arc<Self>,
        mut stream: Option<BusStream<CancelRequest>>,
        shutdown: CancellationToken,
    ) {
        loop {
            let Some(mut cancels) = stream.take() else {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
                }
                match self.bus.subscribe_cancels().await {
                    Ok(s) => stream = Some(s),
                    Err(e) => tracing::warn!(error = %e, "Cancel subscription failed"),
                }
                continue;
            };

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    request = cancels.next() => match request {
                        Some(request) => self.handle_cancel(request).await,
                        None => {
                            tracing::warn!("Cancel subscription closed, resubscribing");
                            break;
                        }
                    },
                }
            }
        }
    }

    /// Terminate the task's context if it runs here; otherwise do nothing.
    pub async fn handle_cancel(&self, request: CancelRequest) {
        let task_id = request.task_id;
        if self.registry.terminate(task_id).await {
            tracing::info!(
                %task_id,
                requested_by = request.requested_by,
                worker_id = %self.settings.worker_id,
                "Terminating execution of canceled task",
            );
        } else {
            tracing::debug!(%task_id, "Cancel request for a task not running here");
        }
    }
}
