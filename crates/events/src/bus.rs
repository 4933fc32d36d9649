use async_trait::async_trait;
use futures::stream::BoxStream;
use taskforge_core::events::{CancelRequest, TaskUpdate};

/// Stream of messages received from one bus channel. It ends when the
/// underlying subscription is closed; callers resubscribe.
pub type BusStream<T> = BoxStream<'static, T>;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Bus unavailable: {0}")]
    Unavailable(String),

    #[error("Bus message encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Unsupported bus URL: {0}")]
    UnsupportedUrl(String),
}

/// Publish/subscribe transport for task notifications.
///
/// Messages are fire-and-forget. A subscriber only sees messages published
/// after its subscription was established.
#[async_trait]
pub trait TaskBus: Send + Sync + 'static {
    async fn publish_update(&self, update: &TaskUpdate) -> Result<(), BusError>;

    async fn publish_cancel(&self, request: &CancelRequest) -> Result<(), BusError>;

    async fn subscribe_updates(&self) -> Result<BusStream<TaskUpdate>, BusError>;

    async fn subscribe_cancels(&self) -> Result<BusStream<CancelRequest>, BusError>;
}
