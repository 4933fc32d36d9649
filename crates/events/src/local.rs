//! In-process bus backed by `tokio::sync::broadcast` channels.
//!
//! Shared as `Arc<LocalBus>` (or `Arc<dyn TaskBus>`) between the gateway
//! and any coordinators embedded in the same process.

use async_trait::async_trait;
use futures::StreamExt;
use taskforge_core::events::{CancelRequest, TaskUpdate, TASK_CANCEL_CHANNEL, TASK_UPDATES_CHANNEL};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::bus::{BusError, BusStream, TaskBus};

/// Default buffer capacity for each broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

pub struct LocalBus {
    updates: broadcast::Sender<TaskUpdate>,
    cancels: broadcast::Sender<CancelRequest>,
}

impl LocalBus {
    /// Create a bus with a specific per-channel capacity.
    ///
    /// When a buffer is full the oldest messages are dropped and slow
    /// subscribers skip ahead with a warning.
    pub fn new(capacity: usize) -> Self {
        let (updates, _) = broadcast::channel(capacity);
        let (cancels, _) = broadcast::channel(capacity);
        Self { updates, cancels }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

fn receiver_stream<T>(rx: broadcast::Receiver<T>, channel: &'static str) -> BusStream<T>
where
    T: Clone + Send + 'static,
{
    futures::stream::unfold(rx, move |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(item) => return Some((item, rx)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(channel, skipped, "Bus subscriber lagged, messages dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}

#[async_trait]
impl TaskBus for LocalBus {
    async fn publish_update(&self, update: &TaskUpdate) -> Result<(), BusError> {
        // A SendError only means there are no subscribers right now.
        let _ = self.updates.send(update.clone());
        Ok(())
    }

    async fn publish_cancel(&self, request: &CancelRequest) -> Result<(), BusError> {
        let _ = self.cancels.send(request.clone());
        Ok(())
    }

    async fn subscribe_updates(&self) -> Result<BusStream<TaskUpdate>, BusError> {
        Ok(receiver_stream(self.updates.subscribe(), TASK_UPDATES_CHANNEL))
    }

    async fn subscribe_cancels(&self) -> Result<BusStream<CancelRequest>, BusError> {
        Ok(receiver_stream(self.cancels.subscribe(), TASK_CANCEL_CHANNEL))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
