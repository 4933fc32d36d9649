pub mod admission;
pub mod error;
pub mod events;
pub mod task;
pub mod types;
pub mod workload;
