//! WebSocket upgrade handler.

use crate::actors::Session;
use crate::auth::extract_token;
use crate::errors::ChatError;
use crate::routes::AppState;

use axum::extract::ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Subprotocol offered to clients.
pub const CHAT_SUBPROTOCOL: &str = "chat";

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    /// Fallback for clients that cannot set `Authorization` on an upgrade.
    pub token: Option<String>,
}

/// `GET /ws/chat`
///
/// Authenticates before anything else: a missing or rejected token is a 401
/// and no session is created.
#[instrument(skip_all, name = "chat.handlers.ws")]
pub async fn ws_chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ChatError> {
    let token = extract_token(&headers, query.token.as_deref()).ok_or_else(|| {
        debug!(target: "chat.handlers.ws", "Missing access token");
        ChatError::InvalidToken("missing access token".to_string())
    })?;

    let user = state.validator.validate(token).await?;

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    let session = Session::new(
        user,
        &state.hub,
        state.bridge.clone(),
        state.session_config,
    );

    Ok(upgrade
        .protocols([CHAT_SUBPROTOCOL])
        .max_message_size(state.max_message_bytes)
        .on_upgrade(move |socket| async move {
            let (sink, stream) = socket.split();
            session.run(sink, stream).await;
        }))
}
