use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures::StreamExt;
use taskforge_core::events::TaskUpdate;
use taskforge_events::TaskBus;
use tokio_util::sync::CancellationToken;

use crate::ws::WsManager;

/// Delay before re-subscribing after the update subscription dropped.
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Pushes every task update to its owner's live connections.
///
/// Updates for owners with no open connection are dropped; clients catch up
/// through the task listing when they reconnect.
pub struct UpdateRelay {
    bus: Arc<dyn TaskBus>,
    ws_manager: Arc<WsManager>,
}

impl UpdateRelay {
    pub fn new(bus: Arc<dyn TaskBus>, ws_manager: Arc<WsManager>) -> Self {
        Self { bus, ws_manager }
    }

    /// Run until `shutdown` is cancelled, re-subscribing whenever the bus
    /// subscription ends.
    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            let mut updates = match self.bus.subscribe_updates().await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(error = %e, "Update subscription failed, retrying");
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => continue,
                    }
                }
            };
            tracing::info!("Update relay subscribed");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Update relay stopped");
                        return;
                    }
                    update = updates.next() => match update {
                        Some(update) => self.deliver(&update).await,
                        None => {
                            tracing::warn!("Update subscription closed, resubscribing");
                            break;
                        }
                    },
                }
            }
        }
    }

    async fn deliver(&self, update: &TaskUpdate) {
        let text = update.to_client_message().to_string();
        let delivered = self
            .ws_manager
            .send_to_user(update.owner_id, Message::Text(text.into()))
            .await;
        tracing::trace!(
            task_id = %update.task_id,
            owner_id = update.owner_id,
            status = %update.status,
            delivered,
            "Relayed task update",
        );
    }
}
