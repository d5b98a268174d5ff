//! Redis pub/sub channel bus.
//!
//! Each subscription opens its own pub/sub connection, so cancelling one topic
//! never disturbs another. Dropping the stream unsubscribes.

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use redis::Client;
use tracing::debug;

use sentiment_realtime::{BusError, BusStream, ChannelBus};

/// Channel bus backed by Redis pub/sub.
#[derive(Debug, Clone)]
pub struct RedisBus {
    client: Client,
}

impl RedisBus {
    /// Creates a bus for the given Redis URL. No connection is made yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn open(url: &str) -> Result<Self, BusError> {
        let client = Client::open(url).map_err(|e| BusError::Connection(e.to_string()))?;
        Ok(Self { client })
    }
}

impl ChannelBus for RedisBus {
    fn subscribe(&self, channel: &str) -> BoxFuture<'_, Result<BusStream, BusError>> {
        let channel = channel.to_string();
        async move {
            let mut pubsub = self
                .client
                .get_async_pubsub()
                .await
                .map_err(|e| BusError::Connection(e.to_string()))?;

            pubsub
                .subscribe(&channel)
                .await
                .map_err(|e| BusError::Subscribe {
                    channel: channel.clone(),
                    reason: e.to_string(),
                })?;
            debug!("Redis subscription open on {}", channel);

            let payloads = pubsub
                .into_on_message()
                .map(|msg| msg.get_payload_bytes().to_vec());
            Ok(payloads.boxed())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_rejects_bad_url() {
        let result = RedisBus::open("not a url");
        assert!(matches!(result, Err(BusError::Connection(_))));
    }

    #[test]
    fn test_open_accepts_redis_url() {
        assert!(RedisBus::open("redis://localhost:6379").is_ok());
    }
}
