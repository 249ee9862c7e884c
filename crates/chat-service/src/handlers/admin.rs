//! Administrative endpoints under `/api/ws`.

use crate::errors::ChatError;
use crate::protocol::{Envelope, UserInfo};
use crate::routes::AppState;

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct ConnectedUsers {
    pub users: Vec<UserInfo>,
    /// Session count, not user count.
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct HubStats {
    pub connected_clients: usize,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    pub message: &'static str,
    pub data: Envelope,
}

/// `GET /api/ws/users`
#[instrument(skip_all, name = "chat.handlers.users")]
pub async fn connected_users(
    State(state): State<Arc<AppState>>,
) -> Json<DataResponse<ConnectedUsers>> {
    Json(DataResponse {
        data: ConnectedUsers {
            users: state.hub.connected_users(),
            count: state.hub.session_count(),
        },
    })
}

/// `GET /api/ws/stats`
#[instrument(skip_all, name = "chat.handlers.stats")]
pub async fn hub_stats(State(state): State<Arc<AppState>>) -> Json<DataResponse<HubStats>> {
    Json(DataResponse {
        data: HubStats {
            connected_clients: state.hub.session_count(),
            status: "running",
        },
    })
}

/// `POST /api/ws/test-broadcast`
///
/// Publishes a diagnostic `system` envelope on the default channel. It
/// reaches local sessions the same way chat lines do, through the bus.
#[instrument(skip_all, name = "chat.handlers.test_broadcast")]
pub async fn test_broadcast(
    State(state): State<Arc<AppState>>,
) -> Result<Json<BroadcastResponse>, ChatError> {
    let envelope = Envelope::diagnostic(&state.default_channel);
    state
        .bridge
        .publish(&state.default_channel, &envelope)
        .await?;

    info!(
        target: "chat.handlers",
        channel = %state.default_channel,
        "Diagnostic broadcast published"
    );

    Ok(Json(BroadcastResponse {
        message: "Test message sent successfully",
        data: envelope,
    }))
}
