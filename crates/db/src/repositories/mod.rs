//! Repository structs, one per table. Each is a unit struct whose async
//! methods take the pool (or any executor, where a transaction may be used).

pub mod job_queue_repo;
pub mod task_repo;
pub mod user_repo;

pub use job_queue_repo::JobQueueRepo;
pub use task_repo::{Submission, TaskRepo};
pub use user_repo::UserRepo;
