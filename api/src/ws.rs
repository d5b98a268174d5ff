//! WebSocket upgrade handlers.
//!
//! Resolves client type, topic and user before the upgrade, then hands the
//! socket to the real-time core through a [`Frame`] adapter.
//!
//! # Endpoints
//!
//! - `GET /ws/{client_type}/{topic}` - sentiment, trading, portfolio or combined
//! - `GET /ws/portfolio` - the caller's portfolio stream
//!
//! The upstream auth layer sets `x-user-id`; portfolio and combined streams
//! require it.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::future;
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};

use sentiment_realtime::{ClientType, Frame, RealtimeHub, SessionRequest, Topic, TopicKey, UserId};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Header carrying the authenticated user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Topic used by the portfolio stream.
pub const PORTFOLIO_TOPIC: &str = "user_portfolio";

/// Upgrade handler for `/ws/{client_type}/{topic}`.
pub async fn topic_ws_handler(
    ws: WebSocketUpgrade,
    Path((client_type, topic)): Path<(String, String)>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> ApiResult<Response> {
    let request = resolve_request(&state.hub, &client_type, &topic, &headers)?;
    Ok(upgrade(ws, state.hub, request))
}

/// Upgrade handler for `/ws/portfolio`.
pub async fn portfolio_ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> ApiResult<Response> {
    let request = resolve_request(
        &state.hub,
        ClientType::Portfolio.as_str(),
        PORTFOLIO_TOPIC,
        &headers,
    )?;
    Ok(upgrade(ws, state.hub, request))
}

/// Validates path and headers into a session request.
///
/// # Errors
///
/// Returns `BadRequest` for an unknown or disabled client type or an invalid
/// topic, `Unauthorized` if the stream needs a user and none was given, and
/// `ServiceUnavailable` while shutting down.
pub fn resolve_request(
    hub: &RealtimeHub,
    client_type: &str,
    topic: &str,
    headers: &HeaderMap,
) -> ApiResult<SessionRequest> {
    if hub.is_shutting_down() {
        return Err(ApiError::ServiceUnavailable("shutting down".to_string()));
    }

    let client_type: ClientType = client_type.parse()?;
    if !hub.config().accepts(client_type) {
        return Err(ApiError::BadRequest(format!(
            "client type {} is not enabled",
            client_type
        )));
    }
    let topic = Topic::new(topic)?;

    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(UserId::new);
    if client_type.requires_user() && user_id.is_none() {
        return Err(ApiError::Unauthorized(format!(
            "{} streams require {}",
            client_type, USER_ID_HEADER
        )));
    }

    Ok(SessionRequest::new(TopicKey::new(client_type, topic), user_id))
}

fn upgrade(ws: WebSocketUpgrade, hub: RealtimeHub, request: SessionRequest) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, hub, request))
}

async fn serve_socket(socket: WebSocket, hub: RealtimeHub, request: SessionRequest) {
    let key = request.key.clone();
    let (sink, stream) = socket.split();
    let sink = sink.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(into_message(frame))));
    let stream = stream.map(|result| result.map(from_message));

    match hub.serve(request, sink, stream).await {
        Ok(report) => debug!(
            "Session {} on {} ended: {} ({} received)",
            report.connection_id, key, report.reason, report.messages_received
        ),
        Err(e) => warn!("Session on {} rejected: {}", key, e),
    }
}

/// Converts a core frame into an axum message.
#[must_use]
pub fn into_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(bytes) => Message::Binary(bytes.into()),
        Frame::Ping(bytes) => Message::Ping(bytes.into()),
        Frame::Pong(bytes) => Message::Pong(bytes.into()),
        Frame::Close => Message::Close(None),
    }
}

/// Converts an axum message into a core frame.
#[must_use]
pub fn from_message(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::Text(text.as_str().to_owned()),
        Message::Binary(bytes) => Frame::Binary(bytes.to_vec()),
        Message::Ping(bytes) => Frame::Ping(bytes.to_vec()),
        Message::Pong(bytes) => Frame::Pong(bytes.to_vec()),
        Message::Close(_) => Frame::Close,
    }
}
