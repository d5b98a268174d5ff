//! Real-time metrics tracking.
//!
//! Provides atomic counters for monitoring connections, deliveries and the
//! pub/sub bridge.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

/// Metrics for the real-time hub.
#[derive(Debug)]
pub struct WsMetrics {
    /// Total connections registered.
    connections_opened: AtomicU64,

    /// Total connections deregistered.
    connections_closed: AtomicU64,

    /// Total inbound messages.
    messages_received: AtomicU64,

    /// Total outbound frames queued.
    messages_sent: AtomicU64,

    /// Total transport errors.
    errors: AtomicU64,

    /// Inbound messages rejected by the rate limiter.
    rate_limited: AtomicU64,

    /// Inbound messages that failed to parse.
    malformed: AtomicU64,

    /// Connections dropped by the dispatcher after a failed send.
    evictions: AtomicU64,

    /// Payloads received from the channel bus.
    bus_messages: AtomicU64,

    /// Bus payloads that failed to decode.
    decode_errors: AtomicU64,

    /// Bus subscriptions started.
    subscriptions_started: AtomicU64,

    /// Bus subscriptions cancelled.
    subscriptions_stopped: AtomicU64,

    /// Start time for rate calculation.
    start_time: Instant,
}

impl Default for WsMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl WsMetrics {
    /// Creates a new metrics instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections_opened: AtomicU64::new(0),
            connections_closed: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            bus_messages: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            subscriptions_started: AtomicU64::new(0),
            subscriptions_stopped: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Records a connection opened.
    pub fn record_connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a connection closed.
    pub fn record_connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a message received.
    pub fn record_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Records `count` frames queued for delivery.
    pub fn record_messages_sent(&self, count: u64) {
        self.messages_sent.fetch_add(count, Ordering::Relaxed);
    }

    /// Records an error.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a rate-limit rejection.
    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a malformed inbound message.
    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records `count` evicted connections.
    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    /// Records a bus payload.
    pub fn record_bus_message(&self) {
        self.bus_messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a bus decode failure.
    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a bus subscription started.
    pub fn record_subscription_started(&self) {
        self.subscriptions_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a bus subscription stopped.
    pub fn record_subscription_stopped(&self) {
        self.subscriptions_stopped.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the total connections opened.
    #[must_use]
    pub fn connections_opened(&self) -> u64 {
        self.connections_opened.load(Ordering::Relaxed)
    }

    /// Returns the total connections closed.
    #[must_use]
    pub fn connections_closed(&self) -> u64 {
        self.connections_closed.load(Ordering::Relaxed)
    }

    /// Returns the current active connections.
    #[must_use]
    pub fn active_connections(&self) -> u64 {
        self.connections_opened()
            .saturating_sub(self.connections_closed())
    }

    /// Returns the total messages received.
    #[must_use]
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Returns the total messages sent.
    #[must_use]
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    /// Returns the total errors.
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Returns the total rate-limit rejections.
    #[must_use]
    pub fn rate_limited(&self) -> u64 {
        self.rate_limited.load(Ordering::Relaxed)
    }

    /// Returns the total malformed messages.
    #[must_use]
    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    /// Returns the total evictions.
    #[must_use]
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Returns the total bus payloads.
    #[must_use]
    pub fn bus_messages(&self) -> u64 {
        self.bus_messages.load(Ordering::Relaxed)
    }

    /// Returns the total bus decode failures.
    #[must_use]
    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    /// Returns the total subscriptions started.
    #[must_use]
    pub fn subscriptions_started(&self) -> u64 {
        self.subscriptions_started.load(Ordering::Relaxed)
    }

    /// Returns the total subscriptions stopped.
    #[must_use]
    pub fn subscriptions_stopped(&self) -> u64 {
        self.subscriptions_stopped.load(Ordering::Relaxed)
    }

    /// Returns the uptime in seconds.
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Returns messages per second (received + sent).
    #[must_use]
    pub fn messages_per_second(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            (self.messages_received() + self.messages_sent()) as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Returns a snapshot of all metrics.
    #[must_use]
    pub fn snapshot(&self) -> WsMetricsSnapshot {
        WsMetricsSnapshot {
            connections_opened: self.connections_opened(),
            connections_closed: self.connections_closed(),
            active_connections: self.active_connections(),
            messages_received: self.messages_received(),
            messages_sent: self.messages_sent(),
            errors: self.errors(),
            rate_limited: self.rate_limited(),
            malformed: self.malformed(),
            evictions: self.evictions(),
            bus_messages: self.bus_messages(),
            decode_errors: self.decode_errors(),
            subscriptions_started: self.subscriptions_started(),
            subscriptions_stopped: self.subscriptions_stopped(),
            uptime_secs: self.uptime_secs(),
            messages_per_second: self.messages_per_second(),
        }
    }
}

/// A point-in-time snapshot of real-time metrics.
#[derive(Debug, Clone, Serialize)]
pub struct WsMetricsSnapshot {
    /// Total connections opened.
    pub connections_opened: u64,
    /// Total connections closed.
    pub connections_closed: u64,
    /// Active connections.
    pub active_connections: u64,
    /// Messages received.
    pub messages_received: u64,
    /// Messages sent.
    pub messages_sent: u64,
    /// Errors.
    pub errors: u64,
    /// Rate-limit rejections.
    pub rate_limited: u64,
    /// Malformed inbound messages.
    pub malformed: u64,
    /// Evicted connections.
    pub evictions: u64,
    /// Bus payloads received.
    pub bus_messages: u64,
    /// Bus decode failures.
    pub decode_errors: u64,
    /// Subscriptions started.
    pub subscriptions_started: u64,
    /// Subscriptions stopped.
    pub subscriptions_stopped: u64,
    /// Uptime in seconds.
    pub uptime_secs: u64,
    /// Messages per second.
    pub messages_per_second: f64,
}
