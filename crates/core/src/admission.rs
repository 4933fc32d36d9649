//! Admission control limits applied by the gateway before a task is queued.

/// Default number of PENDING + RUNNING tasks a single user may hold.
pub const DEFAULT_MAX_CONCURRENT_PER_USER: i64 = 5;

/// Default hard ceiling on the iteration count of a single task.
pub const DEFAULT_MAX_ITERATIONS: u64 = 1_000_000_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionLimits {
    pub max_concurrent_per_user: i64,
    pub max_iterations: u64,
}

impl Default for AdmissionLimits {
    fn default() -> Self {
        Self {
            max_concurrent_per_user: DEFAULT_MAX_CONCURRENT_PER_USER,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}
