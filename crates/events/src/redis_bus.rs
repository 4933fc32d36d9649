//! Redis pub/sub transport for multi-process deployments.
//!
//! Publishing goes through one multiplexed connection shared by all
//! callers. Each subscription opens its own pub/sub connection, because a
//! Redis connection in subscribe mode cannot issue other commands.
//!
//! Messages are JSON. A message that fails to decode is logged and skipped.

use ::redis::aio::MultiplexedConnection;
use ::redis::AsyncCommands;
use async_trait::async_trait;
use futures::StreamExt;
use taskforge_core::events::{CancelRequest, TaskUpdate, TASK_CANCEL_CHANNEL, TASK_UPDATES_CHANNEL};

use crate::bus::{BusError, BusStream, TaskBus};

fn unavailable(err: ::redis::RedisError) -> BusError {
    BusError::Unavailable(err.to_string())
}

pub struct RedisBus {
    client: ::redis::Client,
    conn: MultiplexedConnection,
}

impl RedisBus {
    /// Connect to the Redis server at `url`.
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let client = ::redis::Client::open(url).map_err(unavailable)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(unavailable)?;
        tracing::info!(url, "Connected to Redis bus");
        Ok(Self { client, conn })
    }

    async fn publish_json(&self, channel: &'static str, payload: String) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let _receivers: i64 = conn.publish(channel, payload).await.map_err(unavailable)?;
        Ok(())
    }

    async fn subscribe_json<T>(&self, channel: &'static str) -> Result<BusStream<T>, BusError>
    where
        T: serde::de::DeserializeOwned + Send + 'static,
    {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(unavailable)?;
        pubsub.subscribe(channel).await.map_err(unavailable)?;

        let stream = pubsub.into_on_message().filter_map(move |msg| async move {
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(channel, error = %e, "Unreadable bus payload");
                    return None;
                }
            };
            match serde_json::from_str::<T>(&payload) {
                Ok(item) => Some(item),
                Err(e) => {
                    tracing::warn!(channel, error = %e, bytes = payload.len(), "Malformed bus message");
                    None
                }
            }
        });
        Ok(stream.boxed())
    }
}

#[async_trait]
impl TaskBus for RedisBus {
    async fn publish_update(&self, update: &TaskUpdate) -> Result<(), BusError> {
        self.publish_json(TASK_UPDATES_CHANNEL, serde_json::to_string(update)?)
            .await
    }

    async fn publish_cancel(&self, request: &CancelRequest) -> Result<(), BusError> {
        self.publish_json(TASK_CANCEL_CHANNEL, serde_json::to_string(request)?)
            .await
    }

    async fn subscribe_updates(&self) -> Result<BusStream<TaskUpdate>, BusError> {
        self.subscribe_json(TASK_UPDATES_CHANNEL).await
    }

    async fn subscribe_cancels(&self) -> Result<BusStream<CancelRequest>, BusError> {
        self.subscribe_json(TASK_CANCEL_CHANNEL).await
    }
}
