//! Strongly typed keys for the registry and the channel bus.
//!
//! Provides client-type parsing, topic validation and bus channel naming.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::RealtimeError;

/// Maximum topic length in bytes.
pub const MAX_TOPIC_LEN: usize = 64;

/// Global connection ID counter.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocates the next connection ID.
    #[must_use]
    pub fn next() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Wraps a raw value. Intended for tests and log correlation.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Category of stream a client connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    /// Sentiment analysis results.
    Sentiment,
    /// Trading signals.
    Trading,
    /// Per-user portfolio updates.
    Portfolio,
    /// Sentiment and trading data combined.
    Combined,
}

impl ClientType {
    /// All client types.
    pub const ALL: [Self; 4] = [Self::Sentiment, Self::Trading, Self::Portfolio, Self::Combined];

    /// Returns the client type as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sentiment => "sentiment",
            Self::Trading => "trading",
            Self::Portfolio => "portfolio",
            Self::Combined => "combined",
        }
    }

    /// Returns the envelope `type` used for broadcasts to this client type.
    #[must_use]
    pub const fn message_type(&self) -> &'static str {
        match self {
            Self::Sentiment => "sentiment",
            Self::Trading => "trading_signal",
            Self::Portfolio => "portfolio_update",
            Self::Combined => "combined_update",
        }
    }

    /// Returns true if connections of this type must carry a user id.
    #[must_use]
    pub const fn requires_user(&self) -> bool {
        matches!(self, Self::Portfolio | Self::Combined)
    }
}

impl fmt::Display for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientType {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sentiment" => Ok(Self::Sentiment),
            "trading" => Ok(Self::Trading),
            "portfolio" => Ok(Self::Portfolio),
            "combined" => Ok(Self::Combined),
            other => Err(RealtimeError::InvalidClientType(other.to_string())),
        }
    }
}

/// A validated topic, usually a ticker symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// Validates and wraps a topic.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTopic` if the topic is empty, longer than
    /// [`MAX_TOPIC_LEN`], or contains whitespace or control characters.
    pub fn new(raw: impl Into<String>) -> Result<Self, RealtimeError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(RealtimeError::InvalidTopic("topic is empty".to_string()));
        }
        if raw.len() > MAX_TOPIC_LEN {
            return Err(RealtimeError::InvalidTopic(format!(
                "topic exceeds {} bytes",
                MAX_TOPIC_LEN
            )));
        }
        if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(RealtimeError::InvalidTopic(format!(
                "topic contains whitespace: {:?}",
                raw
            )));
        }
        Ok(Self(raw))
    }

    /// Returns the topic as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Topic {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}

/// Identity of an authenticated user, resolved upstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wraps a user id. Returns None for an empty string.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            None
        } else {
            Some(Self(raw))
        }
    }

    /// Returns the user id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Registry bucket key and bus subscription key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicKey {
    /// Client type.
    pub client_type: ClientType,
    /// Topic.
    pub topic: Topic,
}

impl TopicKey {
    /// Creates a new topic key.
    #[must_use]
    pub const fn new(client_type: ClientType, topic: Topic) -> Self {
        Self { client_type, topic }
    }

    /// Returns the bus channel name, `<client_type>_updates:<topic>`.
    #[must_use]
    pub fn channel_name(&self) -> String {
        format!("{}_updates:{}", self.client_type.as_str(), self.topic)
    }

    /// Parses a bus channel name back into a key.
    ///
    /// Returns None if the format is invalid or either part fails validation.
    #[must_use]
    pub fn parse_channel(channel: &str) -> Option<Self> {
        let (prefix, topic) = channel.split_once(':')?;
        let client_type = prefix.strip_suffix("_updates")?.parse().ok()?;
        let topic = Topic::new(topic).ok()?;
        Some(Self::new(client_type, topic))
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.client_type, self.topic)
    }
}
