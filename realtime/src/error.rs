//! Error types for the real-time core.
//!
//! Every per-connection error is contained at the connection boundary; none of
//! these variants is ever fanned out to other connections.

use crate::types::ConnectionId;

/// Errors raised by the registry, dispatcher and session layers.
#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    /// Client type is unknown or not enabled in this deployment.
    #[error("invalid client type: {0}")]
    InvalidClientType(String),

    /// Topic failed validation.
    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    /// The connection id is already present in the registry.
    #[error("connection {0} is already registered")]
    AlreadyRegistered(ConnectionId),

    /// The connection's outbound queue is gone.
    #[error("transport closed for connection {0}")]
    TransportClosed(ConnectionId),

    /// The connection did not drain its outbound queue in time.
    #[error("send timed out for connection {0}")]
    SendTimeout(ConnectionId),

    /// Inbound frame is not a JSON object with a string `type`.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// A bus payload could not be decoded.
    #[error("failed to decode payload on {channel}: {reason}")]
    ChannelDecode {
        /// Bus channel name.
        channel: String,
        /// Decoder error message.
        reason: String,
    },

    /// Channel bus failure.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Outbound message could not be serialized.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by channel bus implementations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BusError {
    /// The backend could not be reached.
    #[error("bus connection failed: {0}")]
    Connection(String),

    /// The backend refused the subscription.
    #[error("subscribe to {channel} failed: {reason}")]
    Subscribe {
        /// Channel name.
        channel: String,
        /// Backend error message.
        reason: String,
    },
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Rate limit must allow at least one request.
    #[error("rate_limit_max_requests must be > 0")]
    InvalidRateLimit,

    /// Rate-limit window must be non-zero.
    #[error("rate_limit_window must be > 0")]
    InvalidRateWindow,

    /// Shard count must be non-zero.
    #[error("rate_limit_shards must be > 0")]
    InvalidShardCount,

    /// Send timeout must be non-zero.
    #[error("send_timeout must be > 0")]
    InvalidSendTimeout,

    /// Outbound buffer must hold at least one frame.
    #[error("outbound_buffer must be > 0")]
    InvalidOutboundBuffer,

    /// At least one client type must be enabled.
    #[error("at least one client type must be enabled")]
    NoClientTypes,

    /// Backoff bounds are inconsistent.
    #[error("bus_backoff_initial must be > 0 and <= bus_backoff_max")]
    InvalidBackoff,

    /// Environment value could not be parsed.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RealtimeError::InvalidClientType("news".to_string());
        assert_eq!(err.to_string(), "invalid client type: news");

        let err = RealtimeError::TransportClosed(ConnectionId::from_raw(7));
        assert_eq!(err.to_string(), "transport closed for connection 7");
    }

    #[test]
    fn test_bus_error_is_transparent() {
        let err: RealtimeError = BusError::Connection("refused".to_string()).into();
        assert_eq!(err.to_string(), "bus connection failed: refused");
    }

    #[test]
    fn test_config_error_invalid_value() {
        let err = ConfigError::InvalidValue {
            key: "API_PORT".to_string(),
            value: "abc".to_string(),
        };
        assert_eq!(err.to_string(), "invalid value for API_PORT: abc");
    }
}
