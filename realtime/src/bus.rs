//! Channel bus abstraction.
//!
//! The core only subscribes; publishing is done by analysis and trading
//! services. A subscription is a stream of raw payloads that ends when the
//! backend drops it.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use futures::future::{self, BoxFuture};
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::error::BusError;

/// Raw payloads delivered on one bus channel.
pub type BusStream = BoxStream<'static, Vec<u8>>;

/// A publish/subscribe backend the bridge can subscribe to.
pub trait ChannelBus: Send + Sync + 'static {
    /// Opens a subscription to a named channel.
    fn subscribe(&self, channel: &str) -> BoxFuture<'_, Result<BusStream, BusError>>;
}

/// Default per-channel buffer for [`MemoryBus`].
pub const MEMORY_BUS_CAPACITY: usize = 1024;

/// In-process bus backed by tokio broadcast channels. Single node only.
#[derive(Debug)]
pub struct MemoryBus {
    channels: Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>,
    capacity: usize,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(MEMORY_BUS_CAPACITY)
    }
}

impl MemoryBus {
    /// Creates a bus with the given per-channel buffer.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Vec<u8>> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Publishes a payload. Returns the number of live subscribers reached.
    pub fn publish(&self, channel: &str, payload: impl Into<Vec<u8>>) -> usize {
        self.sender(channel).send(payload.into()).unwrap_or(0)
    }

    /// Returns the number of live subscribers on a channel.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel)
            .map(broadcast::Sender::receiver_count)
            .unwrap_or(0)
    }
}

impl ChannelBus for MemoryBus {
    fn subscribe(&self, channel: &str) -> BoxFuture<'_, Result<BusStream, BusError>> {
        let rx = self.sender(channel).subscribe();
        let name = channel.to_string();

        let payloads = stream::unfold((rx, name), |(mut rx, name)| async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => return Some((payload, (rx, name))),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Subscriber on {} lagged, skipped {} payloads", name, skipped);
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });

        future::ready(Ok(payloads.boxed())).boxed()
    }
}
