//! HTTP Router
//!
//! Routes for the host: the `/ws` endpoint remote apps attach to, and a
//! `/status` snapshot for the surrounding shell.

use axum::Router;
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::AppState;
use super::handler::{ConnectQuery, handle_websocket};

/// Build the host router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/status", get(status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state, query))
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.store.status_snapshot())
}
