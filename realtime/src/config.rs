//! Real-time core configuration.
//!
//! Provides configuration options for rate limiting, delivery and the
//! pub/sub bridge.

use std::time::Duration;

use crate::error::ConfigError;
use crate::types::ClientType;

/// Default number of inbound messages allowed per window.
pub const DEFAULT_RATE_LIMIT: usize = 60;

/// Default rate-limit window in seconds.
pub const DEFAULT_RATE_WINDOW_SECS: u64 = 60;

/// Default per-connection send timeout in milliseconds.
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 2_000;

/// Default outbound queue capacity per connection.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Configuration for the real-time hub.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Maximum inbound messages per client per window.
    pub rate_limit_max_requests: usize,

    /// Sliding window length.
    pub rate_limit_window: Duration,

    /// Close the session after this many consecutive rejections (None = never).
    pub rate_limit_disconnect_after: Option<u32>,

    /// Number of rate-limiter shards.
    pub rate_limit_shards: usize,

    /// Per-connection send timeout for broadcasts.
    pub send_timeout: Duration,

    /// Outbound queue capacity per connection.
    pub outbound_buffer: usize,

    /// Client types accepted by the registry.
    pub client_types: Vec<ClientType>,

    /// Cancel a topic's bus subscription when its last subscriber leaves.
    pub teardown_idle_subscriptions: bool,

    /// Initial delay before resubscribing after a bus failure.
    pub bus_backoff_initial: Duration,

    /// Maximum delay between resubscription attempts.
    pub bus_backoff_max: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            rate_limit_max_requests: DEFAULT_RATE_LIMIT,
            rate_limit_window: Duration::from_secs(DEFAULT_RATE_WINDOW_SECS),
            rate_limit_disconnect_after: None,
            rate_limit_shards: 16,
            send_timeout: Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS),
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            client_types: ClientType::ALL.to_vec(),
            teardown_idle_subscriptions: true,
            bus_backoff_initial: Duration::from_secs(1),
            bus_backoff_max: Duration::from_secs(30),
        }
    }
}

impl RealtimeConfig {
    /// Sets the rate limit.
    #[must_use]
    pub fn with_rate_limit(mut self, max_requests: usize, window: Duration) -> Self {
        self.rate_limit_max_requests = max_requests;
        self.rate_limit_window = window;
        self
    }

    /// Closes sessions after `violations` consecutive rate-limit rejections.
    #[must_use]
    pub fn with_disconnect_after(mut self, violations: u32) -> Self {
        self.rate_limit_disconnect_after = Some(violations);
        self
    }

    /// Sets the per-connection send timeout.
    #[must_use]
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Sets the outbound queue capacity.
    #[must_use]
    pub fn with_outbound_buffer(mut self, capacity: usize) -> Self {
        self.outbound_buffer = capacity;
        self
    }

    /// Restricts the accepted client types.
    #[must_use]
    pub fn with_client_types(mut self, client_types: Vec<ClientType>) -> Self {
        self.client_types = client_types;
        self
    }

    /// Keeps bus subscriptions alive after their last subscriber leaves.
    #[must_use]
    pub fn keep_idle_subscriptions(mut self) -> Self {
        self.teardown_idle_subscriptions = false;
        self
    }

    /// Sets the bus resubscription backoff bounds.
    #[must_use]
    pub fn with_bus_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.bus_backoff_initial = initial;
        self.bus_backoff_max = max;
        self
    }

    /// Returns true if the client type is accepted.
    #[must_use]
    pub fn accepts(&self, client_type: ClientType) -> bool {
        self.client_types.contains(&client_type)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit_max_requests == 0 {
            return Err(ConfigError::InvalidRateLimit);
        }

        if self.rate_limit_window.is_zero() {
            return Err(ConfigError::InvalidRateWindow);
        }

        if self.rate_limit_shards == 0 {
            return Err(ConfigError::InvalidShardCount);
        }

        if self.send_timeout.is_zero() {
            return Err(ConfigError::InvalidSendTimeout);
        }

        if self.outbound_buffer == 0 {
            return Err(ConfigError::InvalidOutboundBuffer);
        }

        if self.client_types.is_empty() {
            return Err(ConfigError::NoClientTypes);
        }

        if self.bus_backoff_initial.is_zero() || self.bus_backoff_initial > self.bus_backoff_max {
            return Err(ConfigError::InvalidBackoff);
        }

        Ok(())
    }
}
