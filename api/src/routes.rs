//! Route definitions.

use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Creates the router with all routes.
pub fn create_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/stats", get(handlers::stats));

    let ws_routes = Router::new()
        .route("/ws/portfolio", get(ws::portfolio_ws_handler))
        .route("/ws/{client_type}/{topic}", get(ws::topic_ws_handler));

    // Reached only by services inside the trust boundary
    let internal_routes = Router::new()
        .route(
            "/internal/broadcast/{client_type}/{topic}",
            post(handlers::broadcast_topic),
        )
        .route(
            "/internal/broadcast/{client_type}",
            post(handlers::broadcast_type),
        )
        .route(
            "/internal/users/{user_id}/portfolio",
            post(handlers::send_portfolio),
        );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(public_routes)
        .merge(ws_routes)
        .merge(internal_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
