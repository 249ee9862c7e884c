//! HTTP routes.
//!
//! Defines the Axum router and application state.

use crate::actors::{HubHandle, SessionConfig};
use crate::auth::TokenValidator;
use crate::bridge::Bridge;
use crate::handlers;
use crate::observability::{health_router, HealthState};

use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub bridge: Bridge,
    pub validator: Arc<dyn TokenValidator>,
    pub session_config: SessionConfig,
    /// Inbound frame size limit for upgraded connections.
    pub max_message_bytes: usize,
    /// Channel diagnostic broadcasts go to.
    pub default_channel: String,
}

/// Build the application routes.
///
/// - `/ws/chat` - authenticated WebSocket upgrade
/// - `/api/ws/users`, `/api/ws/stats`, `/api/ws/test-broadcast` - admin surface
/// - `/health`, `/ready` - health endpoints
/// - `/metrics` - Prometheus, when a recorder handle is supplied
/// - `TraceLayer` for request logging
pub fn build_routes(
    state: Arc<AppState>,
    health: Arc<HealthState>,
    metrics: Option<PrometheusHandle>,
) -> Router {
    let api_routes = Router::new()
        .route("/ws/chat", get(handlers::ws_chat))
        .route("/api/ws/users", get(handlers::connected_users))
        .route("/api/ws/stats", get(handlers::hub_stats))
        .route("/api/ws/test-broadcast", post(handlers::test_broadcast))
        .with_state(state);

    let mut app = api_routes.merge(health_router(health));

    if let Some(handle) = metrics {
        app = app.route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        );
    }

    app.layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }
}
