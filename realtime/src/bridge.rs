//! Pub/sub bridge.
//!
//! Keeps one bus subscription per occupied topic key. Each subscription is a
//! forwarding task that decodes payloads and hands them to the dispatcher.
//! Tasks are started and stopped only by [`PubSubBridge::sync`], which compares
//! registry occupancy with the task table under the bridge lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::ChannelBus;
use crate::config::RealtimeConfig;
use crate::dispatcher::Dispatcher;
use crate::error::RealtimeError;
use crate::metrics::WsMetrics;
use crate::registry::ConnectionRegistry;
use crate::types::TopicKey;

struct BridgeInner {
    bus: Arc<dyn ChannelBus>,
    registry: Arc<ConnectionRegistry>,
    dispatcher: Dispatcher,
    metrics: Arc<WsMetrics>,
    tasks: Mutex<HashMap<TopicKey, CancellationToken>>,
    shutdown: CancellationToken,
    teardown_idle: bool,
    backoff_initial: Duration,
    backoff_max: Duration,
}

/// Bridges channel bus subscriptions to live connections.
#[derive(Clone)]
pub struct PubSubBridge {
    inner: Arc<BridgeInner>,
}

impl std::fmt::Debug for PubSubBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSubBridge")
            .field("active_subscriptions", &self.tasks().len())
            .field("teardown_idle", &self.inner.teardown_idle)
            .finish_non_exhaustive()
    }
}

impl PubSubBridge {
    /// Creates a bridge. Forwarding tasks are children of `shutdown`.
    #[must_use]
    pub fn new(
        bus: Arc<dyn ChannelBus>,
        registry: Arc<ConnectionRegistry>,
        dispatcher: Dispatcher,
        metrics: Arc<WsMetrics>,
        config: &RealtimeConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                bus,
                registry,
                dispatcher,
                metrics,
                tasks: Mutex::new(HashMap::new()),
                shutdown,
                teardown_idle: config.teardown_idle_subscriptions,
                backoff_initial: config.bus_backoff_initial,
                backoff_max: config.bus_backoff_max,
            }),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<TopicKey, CancellationToken>> {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Reconciles a topic's subscription with registry occupancy.
    ///
    /// Starts a forwarding task for an occupied topic without one, and cancels
    /// the task of an empty topic when idle teardown is enabled.
    pub fn sync(&self, key: &TopicKey) {
        let mut tasks = self.tasks();
        let occupied = self.inner.registry.is_occupied(key);

        if occupied {
            self.start_locked(&mut tasks, key);
        } else if self.inner.teardown_idle {
            if let Some(token) = tasks.remove(key) {
                token.cancel();
                self.inner.metrics.record_subscription_stopped();
                info!("Unsubscribed from {}", key.channel_name());
            }
        }
    }

    /// Starts a forwarding task for the topic if none is running.
    pub fn ensure_subscribed(&self, key: &TopicKey) {
        let mut tasks = self.tasks();
        self.start_locked(&mut tasks, key);
    }

    fn start_locked(&self, tasks: &mut HashMap<TopicKey, CancellationToken>, key: &TopicKey) {
        if tasks.contains_key(key) || self.inner.shutdown.is_cancelled() {
            return;
        }

        let token = self.inner.shutdown.child_token();
        tasks.insert(key.clone(), token.clone());
        self.inner.metrics.record_subscription_started();

        let bridge = self.clone();
        let key = key.clone();
        tokio::spawn(async move { bridge.forward(key, token).await });
    }

    /// Returns true if a forwarding task is running for the topic.
    #[must_use]
    pub fn is_subscribed(&self, key: &TopicKey) -> bool {
        self.tasks().contains_key(key)
    }

    /// Returns the topics with a running forwarding task.
    #[must_use]
    pub fn active_subscriptions(&self) -> Vec<TopicKey> {
        self.tasks().keys().cloned().collect()
    }

    /// Cancels every forwarding task. No task starts afterwards.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let mut tasks = self.tasks();
        for (_, token) in tasks.drain() {
            token.cancel();
            self.inner.metrics.record_subscription_stopped();
        }
        info!("Pub/sub bridge stopped");
    }

    async fn forward(self, key: TopicKey, token: CancellationToken) {
        let channel = key.channel_name();
        let mut backoff = self.inner.backoff_initial;

        'outer: loop {
            let subscribed = tokio::select! {
                biased;
                () = token.cancelled() => break,
                result = self.inner.bus.subscribe(&channel) => result,
            };

            match subscribed {
                Ok(mut stream) => {
                    info!("Subscribed to {}", channel);
                    loop {
                        let next = tokio::select! {
                            biased;
                            () = token.cancelled() => break 'outer,
                            next = stream.next() => next,
                        };

                        let Some(payload) = next else {
                            warn!("Bus stream for {} ended, resubscribing", channel);
                            break;
                        };
                        backoff = self.inner.backoff_initial;
                        self.forward_payload(&key, &channel, &payload).await;
                    }
                }
                Err(e) => {
                    error!("Failed to subscribe to {}: {}", channel, e);
                    self.inner.metrics.record_error();
                }
            }

            debug!("Retrying {} in {:?}", channel, backoff);
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                () = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(self.inner.backoff_max);
        }

        debug!("Forwarding task for {} stopped", channel);
    }

    async fn forward_payload(&self, key: &TopicKey, channel: &str, payload: &[u8]) {
        self.inner.metrics.record_bus_message();

        let data = match decode_payload(channel, payload) {
            Ok(data) => data,
            Err(e) => {
                warn!("Dropping payload: {}", e);
                self.inner.metrics.record_decode_error();
                return;
            }
        };

        let report = self
            .inner
            .dispatcher
            .broadcast_to_topic(key.client_type, &key.topic, data)
            .await;

        if !report.vacated.is_empty() {
            self.sync(key);
        }
    }
}

/// Decodes a raw bus payload as JSON.
///
/// # Errors
///
/// Returns `ChannelDecode` if the payload is not valid JSON.
pub fn decode_payload(channel: &str, payload: &[u8]) -> Result<Value, RealtimeError> {
    serde_json::from_slice(payload).map_err(|e| RealtimeError::ChannelDecode {
        channel: channel.to_string(),
        reason: e.to_string(),
    })
}
