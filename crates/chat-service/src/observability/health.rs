//! Health endpoints.
//!
//! `GET /health` answers 200 whenever the server is accepting requests.
//! `GET /ready` answers 200 only while the bus subscription is relaying:
//! the flag is raised once the wildcard subscription is confirmed and
//! lowered on shutdown or when the relay dies.

use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Relay readiness, shared between the runtime and the `/ready` route.
#[derive(Debug, Default)]
pub struct HealthState {
    relaying: AtomicBool,
}

impl HealthState {
    /// Not ready until the runtime has subscribed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self) {
        self.relaying.store(true, Ordering::SeqCst);
    }

    pub fn set_not_ready(&self) {
        self.relaying.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.relaying.load(Ordering::SeqCst)
    }
}

/// Router with `/health` and `/ready`.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn status_of(state: &Arc<HealthState>, path: &str) -> StatusCode {
        health_router(Arc::clone(state))
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[test]
    fn test_readiness_transitions() {
        let state = HealthState::new();
        assert!(!state.is_ready(), "Should not be ready before subscribing");

        state.set_ready();
        assert!(state.is_ready());

        state.set_not_ready();
        assert!(!state.is_ready());
    }

    #[tokio::test]
    async fn test_health_ok_regardless_of_readiness() {
        let state = Arc::new(HealthState::new());
        assert_eq!(status_of(&state, "/health").await, StatusCode::OK);

        state.set_ready();
        state.set_not_ready();
        assert_eq!(status_of(&state, "/health").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_follows_relay_state() {
        let state = Arc::new(HealthState::new());
        assert_eq!(
            status_of(&state, "/ready").await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        state.set_ready();
        assert_eq!(status_of(&state, "/ready").await, StatusCode::OK);

        state.set_not_ready();
        assert_eq!(
            status_of(&state, "/ready").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
