//! Connection handle.
//!
//! A `Connection` is the registry's view of one live socket: identity, routing
//! key, outbound queue and close signal. Clones share the same queue and signal.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::CancellationToken;

use crate::config::DEFAULT_SEND_TIMEOUT_MS;
use crate::error::RealtimeError;
use crate::messages::{OutboundFrame, ServerMessage};
use crate::types::{ClientType, ConnectionId, Topic, TopicKey, UserId};

/// Handle to one live client connection.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    key: TopicKey,
    user_id: Option<UserId>,
    connected_at: DateTime<Utc>,
    sender: mpsc::Sender<OutboundFrame>,
    closer: CancellationToken,
    send_timeout: Duration,
}

impl Connection {
    /// Creates a new connection around an existing outbound queue.
    #[must_use]
    pub fn new(
        key: TopicKey,
        user_id: Option<UserId>,
        sender: mpsc::Sender<OutboundFrame>,
        closer: CancellationToken,
    ) -> Self {
        Self {
            id: ConnectionId::next(),
            key,
            user_id,
            connected_at: Utc::now(),
            sender,
            closer,
            send_timeout: Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS),
        }
    }

    /// Sets how long [`Connection::send`] waits for queue space.
    #[must_use]
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Creates a connection with a fresh bounded outbound queue.
    #[must_use]
    pub fn channel(
        key: TopicKey,
        user_id: Option<UserId>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(key, user_id, tx, CancellationToken::new()), rx)
    }

    /// Returns the connection ID.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the registry key.
    #[must_use]
    pub const fn key(&self) -> &TopicKey {
        &self.key
    }

    /// Returns the client type.
    #[must_use]
    pub const fn client_type(&self) -> ClientType {
        self.key.client_type
    }

    /// Returns the topic.
    #[must_use]
    pub const fn topic(&self) -> &Topic {
        &self.key.topic
    }

    /// Returns the owning user, if any.
    #[must_use]
    pub const fn user_id(&self) -> Option<&UserId> {
        self.user_id.as_ref()
    }

    /// Returns when the connection was created.
    #[must_use]
    pub const fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Queues a pre-serialized frame, waiting at most `timeout` for room.
    ///
    /// # Errors
    ///
    /// Returns `SendTimeout` if the queue stayed full, or `TransportClosed`
    /// if the writer side is gone.
    pub async fn send_frame(
        &self,
        frame: OutboundFrame,
        timeout: Duration,
    ) -> Result<(), RealtimeError> {
        match self.sender.send_timeout(frame, timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(RealtimeError::SendTimeout(self.id)),
            Err(SendTimeoutError::Closed(_)) => Err(RealtimeError::TransportClosed(self.id)),
        }
    }

    /// Sends a message to this connection, waiting at most the connection's
    /// send timeout for queue space.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails, the queue stayed full, or the
    /// writer side is gone.
    pub async fn send(&self, message: &ServerMessage) -> Result<(), RealtimeError> {
        let frame = message.to_frame()?;
        self.send_frame(frame, self.send_timeout).await
    }

    /// Signals the session serving this connection to shut down.
    pub fn close(&self) {
        self.closer.cancel();
    }

    /// Returns true once the connection was closed or its writer is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closer.is_cancelled() || self.sender.is_closed()
    }

    /// Completes when [`Connection::close`] is called.
    pub async fn closed(&self) {
        self.closer.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> TopicKey {
        TopicKey::new(ClientType::Sentiment, Topic::new("AAPL").expect("topic"))
    }

    #[tokio::test]
    async fn test_connection_new() {
        let (conn, _rx) = Connection::channel(key(), None, 10);
        assert!(conn.id().get() > 0);
        assert_eq!(conn.client_type(), ClientType::Sentiment);
        assert_eq!(conn.topic().as_str(), "AAPL");
        assert!(conn.user_id().is_none());
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_connection_ids_are_unique() {
        let (a, _ra) = Connection::channel(key(), None, 1);
        let (b, _rb) = Connection::channel(key(), None, 1);
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_connection_send() {
        let (conn, mut rx) = Connection::channel(key(), None, 10);

        conn.send(&ServerMessage::pong()).await.expect("send");

        let frame = rx.recv().await.expect("frame");
        assert!(frame.contains("pong"));
    }

    #[tokio::test]
    async fn test_connection_send_closed() {
        let (conn, rx) = Connection::channel(key(), None, 10);
        drop(rx);

        let result = conn.send(&ServerMessage::pong()).await;
        assert!(matches!(result, Err(RealtimeError::TransportClosed(_))));
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_connection_send_frame_timeout() {
        let (conn, _rx) = Connection::channel(key(), None, 1);
        let frame: OutboundFrame = "{}".into();

        conn.send_frame(frame.clone(), Duration::from_millis(10))
            .await
            .expect("first send");
        let result = conn.send_frame(frame, Duration::from_millis(10)).await;

        assert!(matches!(result, Err(RealtimeError::SendTimeout(_))));
    }

    #[tokio::test]
    async fn test_connection_close() {
        let (conn, _rx) = Connection::channel(key(), None, 1);
        let clone = conn.clone();

        clone.close();

        assert!(conn.is_closed());
        tokio::time::timeout(Duration::from_millis(100), conn.closed())
            .await
            .expect("closed resolves");
    }

    #[tokio::test]
    async fn test_send_times_out_on_full_queue() {
        let (conn, _rx) = Connection::channel(key(), None, 1);
        let conn = conn.with_send_timeout(Duration::from_millis(20));

        conn.send(&ServerMessage::pong()).await.expect("first fits");
        let result = tokio::time::timeout(Duration::from_secs(1), conn.send(&ServerMessage::pong()))
            .await
            .expect("send gives up on its own");

        assert!(matches!(result, Err(RealtimeError::SendTimeout(id)) if id == conn.id()));
    }

    #[test]
    fn test_closed_pending_until_close() {
        let (conn, _rx) = Connection::channel(key(), None, 1);
        let mut closed = tokio_test::task::spawn(conn.closed());

        tokio_test::assert_pending!(closed.poll());
        conn.close();
        assert!(closed.is_woken());
        tokio_test::assert_ready!(closed.poll());
    }
}
