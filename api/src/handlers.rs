//! HTTP route handlers.
//!
//! Health, stats, and the internal publishing endpoints used by analysis and
//! trading services inside the trust boundary.

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use sentiment_realtime::{ClientType, DeliveryReport, HubStats, Topic, UserId};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok` or `shutting_down`.
    pub status: &'static str,
    /// Registered connections.
    pub connections: usize,
    /// Seconds since startup.
    pub uptime_secs: i64,
    /// Current server time.
    pub timestamp: DateTime<Utc>,
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = if state.hub.is_shutting_down() {
        "shutting_down"
    } else {
        "ok"
    };
    Json(HealthResponse {
        status,
        connections: state.hub.registry().len(),
        uptime_secs: state.uptime_secs(),
        timestamp: Utc::now(),
    })
}

/// `GET /stats`
pub async fn stats(State(state): State<AppState>) -> Json<HubStats> {
    Json(state.hub.stats())
}

/// `POST /internal/broadcast/{client_type}/{topic}`
pub async fn broadcast_topic(
    State(state): State<AppState>,
    Path((client_type, topic)): Path<(String, String)>,
    Json(data): Json<Value>,
) -> ApiResult<Json<DeliveryReport>> {
    let client_type: ClientType = client_type.parse()?;
    let topic = Topic::new(topic)?;

    let report = state.hub.broadcast_to_topic(client_type, &topic, data).await;
    debug!(
        "Broadcast to {}/{}: {} delivered, {} evicted",
        client_type,
        topic,
        report.delivered,
        report.evicted.len()
    );
    Ok(Json(report))
}

/// `POST /internal/broadcast/{client_type}`
pub async fn broadcast_type(
    State(state): State<AppState>,
    Path(client_type): Path<String>,
    Json(data): Json<Value>,
) -> ApiResult<Json<DeliveryReport>> {
    let client_type: ClientType = client_type.parse()?;
    let report = state.hub.broadcast_to_type(client_type, data).await;
    Ok(Json(report))
}

/// `POST /internal/users/{user_id}/portfolio`
pub async fn send_portfolio(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(data): Json<Value>,
) -> ApiResult<Json<DeliveryReport>> {
    let user_id =
        UserId::new(user_id).ok_or_else(|| ApiError::BadRequest("empty user id".to_string()))?;
    let report = state.hub.send_to_user(&user_id, data).await;
    Ok(Json(report))
}
