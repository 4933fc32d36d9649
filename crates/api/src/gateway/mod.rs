//! The gateway side of the task protocol.
//!
//! - [`TaskService`] -- admission, queries and the cancellation protocol.
//! - [`UpdateRelay`] -- forwards bus updates to the owner's WebSocket connections.

mod relay;
mod service;

pub use relay::UpdateRelay;
pub use service::TaskService;
