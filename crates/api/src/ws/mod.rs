//! Live `task_update` push channel.
//!
//! Each authenticated socket is registered in the [`WsManager`] under its
//! owner. The update relay looks connections up by owner; the heartbeat
//! keeps idle sockets open while long tasks run.

mod handler;
mod heartbeat;
pub mod manager;

pub use handler::ws_handler;
pub use heartbeat::{start_heartbeat, HEARTBEAT_INTERVAL};
pub use manager::WsManager;
