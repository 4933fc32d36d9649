//! Task event bus.
//!
//! Two logical channels connect the gateway with the worker coordinators:
//!
//! - progress updates ([`TaskUpdate`](taskforge_core::events::TaskUpdate)),
//!   published by whoever persisted the change;
//! - cancellation requests
//!   ([`CancelRequest`](taskforge_core::events::CancelRequest)), fanned out
//!   to every coordinator.
//!
//! [`LocalBus`] serves single-process deployments and tests. With the
//! `redis` feature, [`RedisBus`] carries the same channels between
//! processes.

pub mod bus;
pub mod local;
#[cfg(feature = "redis")]
pub mod redis_bus;

use std::sync::Arc;

pub use bus::{BusError, BusStream, TaskBus};
pub use local::LocalBus;
#[cfg(feature = "redis")]
pub use redis_bus::RedisBus;

/// Build the bus selected by `bus_url`.
///
/// `None`, an empty string or `local` select the in-process bus. A
/// `redis://` or `rediss://` URL selects Redis pub/sub.
pub async fn connect(bus_url: Option<&str>) -> Result<Arc<dyn TaskBus>, BusError> {
    match bus_url.map(str::trim) {
        None | Some("") | Some("local") => Ok(Arc::new(LocalBus::default())),
        Some(url) if url.starts_with("redis://") || url.starts_with("rediss://") => {
            connect_redis(url).await
        }
        Some(url) => Err(BusError::UnsupportedUrl(url.to_string())),
    }
}

#[cfg(feature = "redis")]
async fn connect_redis(url: &str) -> Result<Arc<dyn TaskBus>, BusError> {
    Ok(Arc::new(RedisBus::connect(url).await?))
}

#[cfg(not(feature = "redis"))]
async fn connect_redis(url: &str) -> Result<Arc<dyn TaskBus>, BusError> {
    Err(BusError::UnsupportedUrl(format!(
        "{url} (built without the `redis` feature)"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unset_url_selects_local_bus() {
        assert!(connect(None).await.is_ok());
        assert!(connect(Some("local")).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_scheme_is_rejected() {
        let err = connect(Some("amqp://localhost")).await.err().unwrap();
        assert!(matches!(err, BusError::UnsupportedUrl(_)));
    }
}
