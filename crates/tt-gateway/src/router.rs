//! Axum router assembly (§4.E, §4.F): the WebSocket upgrade endpoint plus
//! the thin HTTP CRUD surface, sharing one [`GatewayState`].

use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http;
use crate::state::GatewayState;
use crate::ws;

/// Build the full application router. `allowed_origins` drives both the
/// WebSocket `Origin` check (§4.E) and the HTTP CORS policy, so the two
/// surfaces share one same-origin posture.
pub fn router(state: Arc<GatewayState>) -> Router {
    let allowed = state.allowed_origins.clone();

    Router::new()
        .route("/ws", get(ws::upgrade))
        .route("/terminals", get(http::list_terminals).post(http::create_terminal))
        .route("/terminals/{id}", get(http::get_terminal).delete(http::delete_terminal))
        .route("/terminals/{id}/command", post(http::send_command))
        .route("/terminals/{id}/resize", post(http::resize_terminal))
        .route("/mux/sessions", get(http::list_mux_sessions))
        .route("/mux/sessions/detailed", get(http::list_mux_sessions_detailed))
        .route("/mux/sessions/{name}/capture", get(http::capture_mux_session))
        .route("/mux/sessions/{name}/command", post(http::send_mux_command))
        .route("/mux/sessions/{name}", delete(http::kill_mux_session))
        .route("/mux/cleanup", post(http::mux_cleanup))
        .route("/health", get(http::health))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(allowed))
        .with_state(state)
}

fn cors_layer(allowed_origins: Vec<String>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            origin
                .to_str()
                .map(|s| allowed_origins.iter().any(|a| s == a))
                .unwrap_or(false)
        }))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::test_support::test_app;

    #[tokio::test]
    async fn health_route_is_wired_up() {
        let app = test_app();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unmatched_route_is_404() {
        let app = test_app();
        let response = app
            .oneshot(Request::builder().uri("/no-such-route").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    /// The WS upgrade route exists and enforces the Origin check (§4.E)
    /// rather than 404ing or accepting same-origin-less requests.
    #[tokio::test]
    async fn ws_route_rejects_missing_origin() {
        let app = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/ws")
                    .header("connection", "upgrade")
                    .header("upgrade", "websocket")
                    .header("sec-websocket-version", "13")
                    .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
