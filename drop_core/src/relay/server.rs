//! Relay HTTP server
//!
//! Routes:
//! - `GET /ws` WebSocket upgrade for participants
//! - `GET /health` room and connection counts

use super::handler::handle_socket;
use super::state::RelayState;
use crate::config::RelayConfig;
use anyhow::Result;
use axum::{
    Json, Router,
    extract::{ConnectInfo, State, ws::WebSocketUpgrade},
    http::StatusCode,
    response::Response,
    routing::get,
};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<RelayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    let ip = addr.ip().to_string();
    ws.on_upgrade(move |socket| handle_socket(socket, state, ip))
}

async fn health_handler(State(state): State<Arc<RelayState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "rooms": state.room_count().await,
        "connections": state.connections(),
    }))
}

async fn not_found_handler() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "not found")
}

pub fn create_router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade_handler))
        .route("/health", get(health_handler))
        .fallback(not_found_handler)
        .with_state(state)
}

/// Serve the relay on an already bound listener
pub async fn serve(
    listener: TcpListener,
    state: Arc<RelayState>,
    cancel_token: Option<CancellationToken>,
) -> Result<()> {
    let router = create_router(state);
    tracing::info!("Relay listening on ws://{}/ws", listener.local_addr()?);

    if let Some(ct) = cancel_token {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            ct.cancelled().await;
            tracing::info!("Relay shutting down gracefully");
        })
        .await?;
    } else {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;
    }

    Ok(())
}

/// Bind `config.host:config.port` and serve until cancelled
pub async fn start_relay_server(
    config: &RelayConfig,
    cancel_token: Option<CancellationToken>,
) -> Result<()> {
    let listener = TcpListener::bind(config.bind_addr()).await?;
    serve(listener, Arc::new(RelayState::new()), cancel_token).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let router = create_router(Arc::new(RelayState::new()));
        let response = router
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
