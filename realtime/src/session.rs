//! Session lifecycle.
//!
//! Serves one client connection from registration to cleanup. The transport
//! is any `Sink<Frame>` plus `Stream<Item = Result<Frame, E>>`; adapters for
//! concrete socket types live with the server.
//!
//! Deregistration runs from a drop guard, so it happens exactly once whether
//! the session returns, fails or is cancelled.

use std::fmt;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::error::RealtimeError;
use crate::hub::RealtimeHub;
use crate::messages::{ClientEvent, OutboundFrame, ServerMessage, INVALID_JSON};
use crate::router::{EventContext, RouteOutcome};
use crate::types::{ConnectionId, TopicKey, UserId};

/// Transport-neutral WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text.
    Text(String),
    /// Binary payload.
    Binary(Vec<u8>),
    /// Keepalive ping.
    Ping(Vec<u8>),
    /// Keepalive pong.
    Pong(Vec<u8>),
    /// Close handshake.
    Close,
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Registering with the hub.
    Connecting,
    /// Serving frames.
    Open,
    /// Closing after a clean end.
    ClosingNormal,
    /// Closing after a failure.
    ClosingError,
    /// Cleanup done.
    Closed,
}

impl SessionState {
    /// Returns true if moving to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Open)
                | (Self::Connecting, Self::ClosingError)
                | (Self::Open, Self::ClosingNormal)
                | (Self::Open, Self::ClosingError)
                | (Self::ClosingNormal, Self::Closed)
                | (Self::ClosingError, Self::Closed)
        )
    }

    /// Returns true for `Closed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// The client sent a close frame.
    ClientClosed,
    /// The inbound stream ended without a close frame.
    StreamEnded,
    /// The transport reported an error.
    TransportError(String),
    /// The dispatcher dropped the connection after a failed send.
    Evicted,
    /// The hub is shutting down.
    Shutdown,
    /// Too many consecutive rate-limit rejections.
    RateLimitExceeded,
}

impl CloseReason {
    /// Returns true if the session ended cleanly.
    #[must_use]
    pub const fn is_normal(&self) -> bool {
        matches!(self, Self::ClientClosed | Self::StreamEnded | Self::Shutdown)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientClosed => write!(f, "client closed"),
            Self::StreamEnded => write!(f, "stream ended"),
            Self::TransportError(e) => write!(f, "transport error: {e}"),
            Self::Evicted => write!(f, "evicted"),
            Self::Shutdown => write!(f, "shutdown"),
            Self::RateLimitExceeded => write!(f, "rate limit exceeded"),
        }
    }
}

/// What the server resolved before handing the socket to the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    /// Client type and topic.
    pub key: TopicKey,
    /// Authenticated user, if any.
    pub user_id: Option<UserId>,
}

impl SessionRequest {
    /// Creates a request.
    #[must_use]
    pub const fn new(key: TopicKey, user_id: Option<UserId>) -> Self {
        Self { key, user_id }
    }
}

/// Summary of a finished session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    /// Connection served.
    pub connection_id: ConnectionId,
    /// Why the session ended.
    pub reason: CloseReason,
    /// Final lifecycle state.
    pub state: SessionState,
    /// Inbound messages received.
    pub messages_received: u64,
    /// Inbound messages rejected by the rate limiter.
    pub rate_limited: u64,
    /// Inbound messages that failed to parse.
    pub malformed: u64,
}

struct DeregisterGuard {
    hub: RealtimeHub,
    id: ConnectionId,
    key: TopicKey,
    armed: bool,
}

impl DeregisterGuard {
    fn deregister(&self) {
        self.hub.deregister(self.id);
        // An eviction may have removed the entry already; reconcile either way.
        self.hub.bridge().sync(&self.key);
    }

    fn release(mut self) {
        self.armed = false;
        self.deregister();
    }
}

impl Drop for DeregisterGuard {
    fn drop(&mut self) {
        if self.armed {
            debug!("Session for {} dropped, deregistering", self.id);
            self.deregister();
        }
    }
}

/// Writer task handle that aborts the task if dropped unfinished.
struct WriterTask(JoinHandle<()>);

impl WriterTask {
    async fn finish(mut self, grace: Duration) {
        if tokio::time::timeout(grace, &mut self.0).await.is_err() {
            debug!("Writer did not drain within {:?}, aborting", grace);
        }
    }
}

impl Drop for WriterTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

enum Admission {
    Allowed,
    Rejected,
    Disconnect,
}

struct SessionLoop<'a> {
    hub: &'a RealtimeHub,
    connection: &'a Connection,
    state: SessionState,
    violations: u32,
    messages_received: u64,
    rate_limited: u64,
    malformed: u64,
}

impl SessionLoop<'_> {
    fn advance(&mut self, next: SessionState) {
        if self.state.can_transition_to(next) {
            self.state = next;
        } else {
            warn!(
                "Ignoring session transition {:?} -> {:?} on {}",
                self.state,
                next,
                self.connection.id()
            );
        }
    }

    fn closed_reason(&self) -> CloseReason {
        if self.hub.is_shutting_down() {
            CloseReason::Shutdown
        } else {
            CloseReason::Evicted
        }
    }

    async fn run<R, E>(&mut self, stream: &mut R) -> CloseReason
    where
        R: Stream<Item = Result<Frame, E>> + Unpin,
        E: fmt::Display,
    {
        loop {
            let next = tokio::select! {
                biased;
                () = self.connection.closed() => return self.closed_reason(),
                next = stream.next() => next,
            };

            // None marks a binary payload that is not UTF-8.
            let text = match next {
                None => return CloseReason::StreamEnded,
                Some(Err(e)) => {
                    self.hub.metrics().record_error();
                    return CloseReason::TransportError(e.to_string());
                }
                Some(Ok(Frame::Close)) => return CloseReason::ClientClosed,
                Some(Ok(Frame::Ping(_) | Frame::Pong(_))) => continue,
                Some(Ok(Frame::Text(text))) => Some(text),
                Some(Ok(Frame::Binary(bytes))) => String::from_utf8(bytes).ok(),
            };

            if let Some(reason) = self.handle_data(text).await {
                return reason;
            }
        }
    }

    async fn handle_data(&mut self, text: Option<String>) -> Option<CloseReason> {
        self.messages_received += 1;
        self.hub.metrics().record_message_received();

        match self.admit().await {
            Admission::Allowed => {}
            Admission::Rejected => return None,
            Admission::Disconnect => return Some(CloseReason::RateLimitExceeded),
        }

        let Some(text) = text else {
            self.reject_malformed(INVALID_JSON).await;
            return None;
        };

        let event = match ClientEvent::parse(&text) {
            Ok(event) => event,
            Err(RealtimeError::MalformedMessage(reason)) => {
                self.reject_malformed(&reason).await;
                return None;
            }
            Err(e) => {
                self.reply(&ServerMessage::error(e.to_string())).await;
                return None;
            }
        };

        let ctx = EventContext {
            connection: self.connection.clone(),
            dispatcher: self.hub.dispatcher().clone(),
        };
        let outcome = tokio::select! {
            biased;
            () = self.connection.closed() => return Some(self.closed_reason()),
            outcome = self.hub.router().route(ctx, event) => outcome,
        };
        if let RouteOutcome::Failed(reason) = outcome {
            debug!("Event on {} failed: {}", self.connection.id(), reason);
        }
        None
    }

    async fn admit(&mut self) -> Admission {
        let id = self.connection.id();
        if self.hub.limiter().allow(id) {
            self.violations = 0;
            return Admission::Allowed;
        }

        self.rate_limited += 1;
        self.violations += 1;
        self.hub.metrics().record_rate_limited();
        debug!("Rate limited connection {} ({} in a row)", id, self.violations);
        self.reply(&ServerMessage::rate_limited()).await;

        let limit = self.hub.config().rate_limit_disconnect_after;
        if limit.is_some_and(|max| self.violations >= max) {
            warn!("Closing connection {} after {} rate-limit rejections", id, self.violations);
            return Admission::Disconnect;
        }
        Admission::Rejected
    }

    async fn reject_malformed(&mut self, reason: &str) {
        self.malformed += 1;
        self.hub.metrics().record_malformed();
        debug!("Malformed message on {}: {}", self.connection.id(), reason);
        self.reply(&ServerMessage::error(reason)).await;
    }

    async fn reply(&self, message: &ServerMessage) {
        let timeout = self.hub.config().send_timeout;
        let sent = match message.to_frame() {
            Ok(frame) => self.connection.send_frame(frame, timeout).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            warn!("Failed to reply on {}: {}", self.connection.id(), e);
            self.hub.metrics().record_error();
        }
    }
}

async fn write_frames<S>(mut sink: S, mut rx: mpsc::Receiver<OutboundFrame>, id: ConnectionId)
where
    S: Sink<Frame> + Unpin,
    S::Error: fmt::Display,
{
    while let Some(frame) = rx.recv().await {
        if let Err(e) = sink.send(Frame::Text(frame.to_string())).await {
            debug!("Writer for {} stopped: {}", id, e);
            return;
        }
    }

    if let Err(e) = sink.send(Frame::Close).await {
        debug!("Close frame for {} not sent: {}", id, e);
    }
    if let Err(e) = sink.close().await {
        debug!("Socket for {} did not close cleanly: {}", id, e);
    }
}

/// Serves one connection until the client leaves, the transport fails, the
/// connection is evicted or the hub shuts down.
///
/// The `subscribed` acknowledgment is the first frame the client sees. The
/// socket is closed by the writer once the outbound queue is drained.
///
/// # Errors
///
/// Returns an error if the connection is rejected by the registry.
pub async fn serve_connection<S, R, E>(
    hub: RealtimeHub,
    request: SessionRequest,
    sink: S,
    mut stream: R,
) -> Result<SessionReport, RealtimeError>
where
    S: Sink<Frame> + Send + Unpin + 'static,
    S::Error: fmt::Display,
    R: Stream<Item = Result<Frame, E>> + Send + Unpin,
    E: fmt::Display + Send,
{
    let config = hub.config();
    let (tx, rx) = mpsc::channel(config.outbound_buffer);
    let connection = Connection::new(
        request.key,
        request.user_id,
        tx,
        hub.shutdown_token().child_token(),
    )
    .with_send_timeout(config.send_timeout);
    let id = connection.id();

    connection.send(&ServerMessage::subscribed(connection.topic())).await?;
    hub.register(connection.clone())?;
    let guard = DeregisterGuard {
        hub: hub.clone(),
        id,
        key: connection.key().clone(),
        armed: true,
    };
    info!(
        "Connection {} opened on {} (user: {})",
        id,
        connection.key(),
        connection.user_id().map_or("-", UserId::as_str)
    );

    let writer = WriterTask(tokio::spawn(write_frames(sink, rx, id)));

    let mut session = SessionLoop {
        hub: &hub,
        connection: &connection,
        state: SessionState::Connecting,
        violations: 0,
        messages_received: 0,
        rate_limited: 0,
        malformed: 0,
    };
    session.advance(SessionState::Open);

    let reason = session.run(&mut stream).await;
    session.advance(if reason.is_normal() {
        SessionState::ClosingNormal
    } else {
        SessionState::ClosingError
    });

    guard.release();
    session.advance(SessionState::Closed);

    let report = SessionReport {
        connection_id: id,
        reason,
        state: session.state,
        messages_received: session.messages_received,
        rate_limited: session.rate_limited,
        malformed: session.malformed,
    };

    drop(connection);
    writer.finish(hub.config().send_timeout).await;

    info!("Connection {} closed: {}", id, report.reason);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::config::RealtimeConfig;
    use crate::messages::{MISSING_EVENT_TYPE, RATE_LIMIT_EXCEEDED};
    use crate::router::EventRouter;
    use crate::types::{ClientType, Topic};
    use futures::channel::mpsc as chan;
    use serde_json::Value;
    use std::io;
    use std::sync::Arc;

    type Inbound = chan::UnboundedSender<Result<Frame, io::Error>>;
    type Outbound = chan::UnboundedReceiver<Frame>;
    type Serving = JoinHandle<Result<SessionReport, RealtimeError>>;

    fn pong_router() -> EventRouter {
        EventRouter::new().with_handler("ping", |ctx: EventContext, _event| async move {
            ctx.connection.send(&ServerMessage::pong()).await?;
            Ok::<(), anyhow::Error>(())
        })
    }

    fn hub(config: RealtimeConfig) -> RealtimeHub {
        RealtimeHub::new(config, Arc::new(MemoryBus::default()), pong_router()).expect("hub")
    }

    fn request() -> SessionRequest {
        SessionRequest::new(
            TopicKey::new(ClientType::Sentiment, Topic::new("AAPL").expect("topic")),
            None,
        )
    }

    fn open(hub: &RealtimeHub) -> (Inbound, Outbound, Serving) {
        let (client_tx, server_rx) = chan::unbounded();
        let (server_tx, client_rx) = chan::unbounded();
        let hub = hub.clone();
        let task = tokio::spawn(async move { hub.serve(request(), server_tx, server_rx).await });
        (client_tx, client_rx, task)
    }

    async fn next_json(rx: &mut Outbound) -> Value {
        let frame = tokio::time::timeout(Duration::from_secs(5), rx.next())
            .await
            .expect("timely")
            .expect("frame");
        match frame {
            Frame::Text(text) => serde_json::from_str(&text).expect("json"),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    fn send(tx: &Inbound, text: &str) {
        tx.unbounded_send(Ok(Frame::Text(text.to_string())))
            .expect("inbound open");
    }

    #[test]
    fn test_state_transitions() {
        use SessionState::*;
        assert!(Connecting.can_transition_to(Open));
        assert!(Open.can_transition_to(ClosingNormal));
        assert!(Open.can_transition_to(ClosingError));
        assert!(ClosingNormal.can_transition_to(Closed));
        assert!(ClosingError.can_transition_to(Closed));
        assert!(!Closed.can_transition_to(Open));
        assert!(!Open.can_transition_to(Closed));
        assert!(!ClosingNormal.can_transition_to(Open));
        assert!(Closed.is_terminal());
    }

    #[tokio::test]
    async fn test_normal_close() {
        let hub = hub(RealtimeConfig::default());
        let (tx, mut rx, task) = open(&hub);

        let ack = next_json(&mut rx).await;
        assert_eq!(ack["type"], "subscribed");
        assert_eq!(ack["topic"], "AAPL");
        assert_eq!(hub.registry().len(), 1);

        send(&tx, r#"{"type":"ping"}"#);
        assert_eq!(next_json(&mut rx).await["type"], "pong");

        tx.unbounded_send(Ok(Frame::Close)).expect("inbound open");
        let report = task.await.expect("join").expect("session");

        assert_eq!(report.reason, CloseReason::ClientClosed);
        assert_eq!(report.state, SessionState::Closed);
        assert_eq!(report.messages_received, 1);
        assert!(hub.registry().is_empty());
        assert_eq!(hub.metrics().connections_closed(), 1);
        assert_eq!(rx.next().await, Some(Frame::Close));
    }

    #[tokio::test]
    async fn test_transport_error_closes_session() {
        let hub = hub(RealtimeConfig::default());
        let (tx, mut rx, task) = open(&hub);
        next_json(&mut rx).await;

        tx.unbounded_send(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")))
            .expect("inbound open");
        let report = task.await.expect("join").expect("session");

        assert!(matches!(report.reason, CloseReason::TransportError(ref e) if e == "reset"));
        assert!(hub.registry().is_empty());
        assert_eq!(hub.metrics().connections_closed(), 1);
        assert_eq!(hub.metrics().errors(), 1);
    }

    #[tokio::test]
    async fn test_stream_end_closes_session() {
        let hub = hub(RealtimeConfig::default());
        let (tx, mut rx, task) = open(&hub);
        next_json(&mut rx).await;

        drop(tx);
        let report = task.await.expect("join").expect("session");

        assert_eq!(report.reason, CloseReason::StreamEnded);
        assert!(hub.registry().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_session_deregisters_once() {
        let hub = hub(RealtimeConfig::default());
        let (_tx, mut rx, task) = open(&hub);
        next_json(&mut rx).await;
        assert_eq!(hub.registry().len(), 1);

        task.abort();
        assert!(task.await.expect_err("aborted").is_cancelled());

        assert!(hub.registry().is_empty());
        assert_eq!(hub.metrics().connections_opened(), 1);
        assert_eq!(hub.metrics().connections_closed(), 1);
        assert!(hub.bridge().active_subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_messages_keep_connection_open() {
        let hub = hub(RealtimeConfig::default());
        let (tx, mut rx, task) = open(&hub);
        next_json(&mut rx).await;

        send(&tx, "not json at all");
        assert_eq!(next_json(&mut rx).await["error"], INVALID_JSON);

        send(&tx, r#"{"data":{"x":1}}"#);
        assert_eq!(next_json(&mut rx).await["error"], MISSING_EVENT_TYPE);

        tx.unbounded_send(Ok(Frame::Binary(vec![0xff, 0xfe])))
            .expect("inbound open");
        assert_eq!(next_json(&mut rx).await["error"], INVALID_JSON);

        send(&tx, r#"{"type":"ping"}"#);
        assert_eq!(next_json(&mut rx).await["type"], "pong");
        assert_eq!(hub.registry().len(), 1);

        drop(tx);
        let report = task.await.expect("join").expect("session");
        assert_eq!(report.malformed, 3);
        assert_eq!(report.messages_received, 4);
    }

    #[tokio::test]
    async fn test_unknown_event_type_is_dropped() {
        let hub = hub(RealtimeConfig::default());
        let (tx, mut rx, task) = open(&hub);
        next_json(&mut rx).await;

        send(&tx, r#"{"type":"mystery"}"#);
        send(&tx, r#"{"type":"ping"}"#);
        assert_eq!(next_json(&mut rx).await["type"], "pong");

        drop(tx);
        task.await.expect("join").expect("session");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_rejects_then_recovers() {
        let config = RealtimeConfig::default().with_rate_limit(3, Duration::from_secs(60));
        let hub = hub(config);
        let (tx, mut rx, task) = open(&hub);
        next_json(&mut rx).await;

        for _ in 0..3 {
            send(&tx, r#"{"type":"ping"}"#);
            assert_eq!(next_json(&mut rx).await["type"], "pong");
        }
        send(&tx, r#"{"type":"ping"}"#);
        assert_eq!(next_json(&mut rx).await["error"], RATE_LIMIT_EXCEEDED);

        tokio::time::advance(Duration::from_secs(60)).await;
        send(&tx, r#"{"type":"ping"}"#);
        assert_eq!(next_json(&mut rx).await["type"], "pong");
        assert_eq!(hub.registry().len(), 1);

        drop(tx);
        let report = task.await.expect("join").expect("session");
        assert_eq!(report.rate_limited, 1);
        assert_eq!(report.reason, CloseReason::StreamEnded);
    }

    #[tokio::test]
    async fn test_invalid_binary_frames_are_rate_limited() {
        let config = RealtimeConfig::default().with_rate_limit(1, Duration::from_secs(60));
        let hub = hub(config);
        let (tx, mut rx, task) = open(&hub);
        next_json(&mut rx).await;

        send(&tx, r#"{"type":"ping"}"#);
        assert_eq!(next_json(&mut rx).await["type"], "pong");

        for _ in 0..20 {
            tx.unbounded_send(Ok(Frame::Binary(vec![0xff, 0xfe])))
                .expect("inbound open");
        }
        for _ in 0..20 {
            assert_eq!(next_json(&mut rx).await["error"], RATE_LIMIT_EXCEEDED);
        }

        drop(tx);
        let report = task.await.expect("join").expect("session");
        assert_eq!(report.messages_received, 21);
        assert_eq!(report.rate_limited, 20);
        assert_eq!(report.malformed, 0);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_blocked_handler() {
        let router = pong_router().with_handler("stall", |_ctx: EventContext, _event| async move {
            futures::future::pending::<()>().await;
            Ok::<(), anyhow::Error>(())
        });
        let hub = RealtimeHub::new(
            RealtimeConfig::default(),
            Arc::new(MemoryBus::default()),
            router,
        )
        .expect("hub");
        let (tx, mut rx, task) = open(&hub);
        next_json(&mut rx).await;

        send(&tx, r#"{"type":"stall"}"#);
        while hub.metrics().messages_received() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        hub.shutdown();
        let report = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("session ends despite the stalled handler")
            .expect("join")
            .expect("session");

        assert_eq!(report.reason, CloseReason::Shutdown);
        assert!(hub.registry().is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_does_not_block_shutdown() {
        let config = RealtimeConfig::default()
            .with_outbound_buffer(1)
            .with_send_timeout(Duration::from_millis(50));
        let hub = hub(config);
        let (client_tx, server_rx) = chan::unbounded();
        // Never ready, so the writer stalls and the outbound queue fills.
        let sink = futures::sink::unfold((), |(), _frame: Frame| async move {
            futures::future::pending::<()>().await;
            Ok::<(), io::Error>(())
        });
        let serving = hub.clone();
        let task = tokio::spawn(async move {
            serving
                .serve(request(), Box::pin(sink), server_rx)
                .await
        });

        for _ in 0..3 {
            send(&client_tx, r#"{"type":"ping"}"#);
        }
        while hub.metrics().messages_received() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        hub.shutdown();
        let report = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("session ends while its queue is full")
            .expect("join")
            .expect("session");

        assert_eq!(report.reason, CloseReason::Shutdown);
        assert!(hub.registry().is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_escalation_disconnects() {
        let config = RealtimeConfig::default()
            .with_rate_limit(1, Duration::from_secs(60))
            .with_disconnect_after(2);
        let hub = hub(config);
        let (tx, mut rx, task) = open(&hub);
        next_json(&mut rx).await;

        send(&tx, r#"{"type":"ping"}"#);
        send(&tx, r#"{"type":"ping"}"#);
        send(&tx, r#"{"type":"ping"}"#);

        let report = task.await.expect("join").expect("session");
        assert_eq!(report.reason, CloseReason::RateLimitExceeded);
        assert_eq!(report.rate_limited, 2);
        assert!(hub.registry().is_empty());

        assert_eq!(next_json(&mut rx).await["type"], "pong");
        assert_eq!(next_json(&mut rx).await["error"], RATE_LIMIT_EXCEEDED);
        assert_eq!(next_json(&mut rx).await["error"], RATE_LIMIT_EXCEEDED);
        assert_eq!(rx.next().await, Some(Frame::Close));
    }

    #[tokio::test]
    async fn test_shutdown_ends_session() {
        let hub = hub(RealtimeConfig::default());
        let (_tx, mut rx, task) = open(&hub);
        next_json(&mut rx).await;

        hub.shutdown();
        let report = task.await.expect("join").expect("session");

        assert_eq!(report.reason, CloseReason::Shutdown);
        assert!(hub.registry().is_empty());
        assert_eq!(rx.next().await, Some(Frame::Close));
    }

    #[tokio::test]
    async fn test_rejected_client_type() {
        let config = RealtimeConfig::default().with_client_types(vec![ClientType::Trading]);
        let hub = hub(config);
        let (server_tx, _client_rx) = chan::unbounded::<Frame>();
        let (_client_tx, server_rx) = chan::unbounded::<Result<Frame, io::Error>>();

        let result = hub.serve(request(), server_tx, server_rx).await;

        assert!(matches!(result, Err(RealtimeError::InvalidClientType(_))));
        assert!(hub.registry().is_empty());
    }
}
