//! Wire message types.
//!
//! Defines the JSON envelopes sent to clients and the events clients send in.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RealtimeError;
use crate::types::{ClientType, Topic};

/// Error text sent when a client exceeds its rate limit.
pub const RATE_LIMIT_EXCEEDED: &str = "Rate limit exceeded";

/// Error text sent for frames that are not JSON objects.
pub const INVALID_JSON: &str = "Invalid JSON format";

/// Error text sent for JSON objects without a string `type`.
pub const MISSING_EVENT_TYPE: &str = "Missing event type";

/// A serialized outbound frame, shared across a broadcast batch.
pub type OutboundFrame = Arc<str>;

/// Data envelope sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type, e.g. `sentiment` or `portfolio_update`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Topic the message belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,

    /// Opaque payload. Always present on updates, even when `null`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Time the envelope was built.
    pub timestamp: DateTime<Utc>,
}

/// Inline error frame sent to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorFrame {
    /// Human readable error.
    pub error: String,

    /// Time the error was raised.
    pub timestamp: DateTime<Utc>,
}

/// Message sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    /// Data or control envelope.
    Envelope(Envelope),
    /// Error response.
    Error(ErrorFrame),
}

impl ServerMessage {
    fn envelope(kind: &str, topic: Option<&Topic>, data: Option<Value>) -> Self {
        Self::Envelope(Envelope {
            kind: kind.to_string(),
            topic: topic.map(|t| t.as_str().to_string()),
            data,
            timestamp: Utc::now(),
        })
    }

    /// Creates a topic broadcast message.
    #[must_use]
    pub fn topic_update(client_type: ClientType, topic: &Topic, data: Value) -> Self {
        Self::envelope(client_type.message_type(), Some(topic), Some(data))
    }

    /// Creates a broadcast for every connection of a client type.
    #[must_use]
    pub fn type_update(client_type: ClientType, data: Value) -> Self {
        Self::envelope(client_type.message_type(), None, Some(data))
    }

    /// Creates a user-targeted portfolio update.
    #[must_use]
    pub fn user_update(data: Value) -> Self {
        Self::envelope(ClientType::Portfolio.message_type(), None, Some(data))
    }

    /// Creates a subscription acknowledgment.
    #[must_use]
    pub fn subscribed(topic: &Topic) -> Self {
        Self::envelope("subscribed", Some(topic), None)
    }

    /// Creates a pong message.
    #[must_use]
    pub fn pong() -> Self {
        Self::envelope("pong", None, None)
    }

    /// Creates an error message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorFrame {
            error: message.into(),
            timestamp: Utc::now(),
        })
    }

    /// Creates the rate-limit rejection message.
    #[must_use]
    pub fn rate_limited() -> Self {
        Self::error(RATE_LIMIT_EXCEEDED)
    }

    /// Returns the envelope type, or None for error frames.
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        match self {
            Self::Envelope(envelope) => Some(&envelope.kind),
            Self::Error(_) => None,
        }
    }

    /// Serializes the message into a shareable frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn to_frame(&self) -> Result<OutboundFrame, RealtimeError> {
        Ok(Arc::from(serde_json::to_string(self)?))
    }
}

/// Event sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientEvent {
    /// Event type tag used for routing.
    #[serde(rename = "type")]
    pub event_type: String,

    /// Event payload.
    #[serde(default)]
    pub data: Value,

    /// Any other top-level fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ClientEvent {
    /// Creates an event.
    #[must_use]
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            extra: Map::new(),
        }
    }

    /// Parses an inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns `MalformedMessage` if the text is not a JSON object with a
    /// non-empty string `type` field.
    pub fn parse(text: &str) -> Result<Self, RealtimeError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|_| RealtimeError::MalformedMessage(INVALID_JSON.to_string()))?;

        let has_type = value
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(|t| !t.is_empty());
        if !value.is_object() {
            return Err(RealtimeError::MalformedMessage(INVALID_JSON.to_string()));
        }
        if !has_type {
            return Err(RealtimeError::MalformedMessage(
                MISSING_EVENT_TYPE.to_string(),
            ));
        }

        serde_json::from_value(value).map_err(|e| RealtimeError::MalformedMessage(e.to_string()))
    }
}
