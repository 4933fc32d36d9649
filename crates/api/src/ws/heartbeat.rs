use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::ws::manager::WsManager;

/// Interval between heartbeat pings.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Ping every open task-update socket each `period` until `shutdown` fires.
///
/// Proxies drop idle WebSockets; a task can run for minutes without a
/// single update, so the socket needs traffic of its own.
pub fn start_heartbeat(
    ws_manager: Arc<WsManager>,
    period: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let pinged = ws_manager.ping_all().await;
                    if pinged > 0 {
                        tracing::debug!(pinged, "WebSocket heartbeat");
                    }
                }
            }
        }
    })
}
