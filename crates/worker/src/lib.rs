//! Worker side of task execution.
//!
//! A [`Coordinator`](coordinator::Coordinator) claims jobs from the durable
//! queue, runs each one in an isolated
//! [`ExecutionContext`](context::ExecutionContext), persists and publishes
//! progress, and stops executions when a cancellation request names a task
//! it owns.

pub mod compute;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod registry;

pub use config::{SubstrateKind, WorkerConfig};
pub use context::{ExecEvent, ExecutionContext, ExecutionHandle, Exit, Substrate};
pub use coordinator::{Coordinator, CoordinatorSettings};
pub use registry::AssignmentRegistry;
