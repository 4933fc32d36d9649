//! Pluggable, interruptible compute workloads.
//!
//! A workload is a plain blocking function. It reports progress through a
//! [`ProgressSink`], which answers with a [`Checkpoint`] telling the workload
//! whether to keep going. The execution substrate decides what a sink does
//! with the report (send it over a channel, print it as a JSON line, ...).

use rand::Rng;

use crate::task::{TaskParams, TaskResult};

/// Smallest number of iterations between two progress reports.
pub const MIN_PROGRESS_STRIDE: u64 = 10_000_000;

/// Number of progress reports aimed for over the life of one task.
pub const TARGET_PROGRESS_REPORTS: u64 = 100;

/// Iterations between progress reports for a task of `iterations`.
pub fn progress_stride(iterations: u64, min_stride: u64) -> u64 {
    (iterations / TARGET_PROGRESS_REPORTS).max(min_stride).max(1)
}

/// Completion percentage rounded down, so only finished work reads 100.
pub fn percent_complete(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let done = u128::from(done.min(total));
    (done * 100 / u128::from(total)) as u8
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    Continue,
    Stop,
}

pub trait ProgressSink {
    fn report(&mut self, percent: u8) -> Checkpoint;
}

impl<F> ProgressSink for F
where
    F: FnMut(u8) -> Checkpoint,
{
    fn report(&mut self, percent: u8) -> Checkpoint {
        self(percent)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WorkloadError {
    #[error("{0}")]
    Failed(String),

    /// The sink asked the workload to stop.
    #[error("interrupted")]
    Interrupted,
}

pub trait Workload: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn run(
        &self,
        params: &TaskParams,
        progress: &mut dyn ProgressSink,
    ) -> Result<TaskResult, WorkloadError>;
}

// ---------------------------------------------------------------------------
// Monte-Carlo pi estimator
// ---------------------------------------------------------------------------

/// Estimates pi by sampling points in the unit square and counting those
/// that land inside the quarter circle.
#[derive(Debug, Clone, Copy)]
pub struct MonteCarloPi {
    min_stride: u64,
}

impl Default for MonteCarloPi {
    fn default() -> Self {
        Self {
            min_stride: MIN_PROGRESS_STRIDE,
        }
    }
}

impl MonteCarloPi {
    /// Use a smaller reporting floor, so short runs still report progress.
    pub fn with_min_stride(min_stride: u64) -> Self {
        Self { min_stride }
    }
}

impl Workload for MonteCarloPi {
    fn name(&self) -> &'static str {
        "monte_carlo_pi"
    }

    fn run(
        &self,
        params: &TaskParams,
        progress: &mut dyn ProgressSink,
    ) -> Result<TaskResult, WorkloadError> {
        let total = params.iterations;
        if total == 0 {
            return Err(WorkloadError::Failed(
                "iterations must be a positive integer".into(),
            ));
        }

        let stride = progress_stride(total, self.min_stride);
        let mut rng = rand::rng();
        let mut inside: u64 = 0;
        let mut done: u64 = 0;

        while done < total {
            let chunk = stride.min(total - done);
            for _ in 0..chunk {
                let x: f64 = rng.random();
                let y: f64 = rng.random();
                if x * x + y * y <= 1.0 {
                    inside += 1;
                }
            }
            done += chunk;

            if done < total && progress.report(percent_complete(done, total)) == Checkpoint::Stop {
                return Err(WorkloadError::Interrupted);
            }
        }

        Ok(TaskResult::Estimate {
            value: 4.0 * inside as f64 / total as f64,
            iterations: total,
        })
    }
}
