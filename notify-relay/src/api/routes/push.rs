//! Push channel WebSocket route.
//!
//! Each upgraded socket registers one connection with the
//! [`ConnectionRegistry`](crate::notification::ConnectionRegistry) and runs a
//! single task that:
//! - drains the connection's delivery queue to the socket as JSON text frames
//! - answers client pings and records every inbound frame as a heartbeat
//! - pings the client every heartbeat interval and closes if the previous
//!   ping went unanswered
//!
//! The connection is unregistered when the task exits for any reason.

use axum::{
    Router,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::api::error::ApiError;
use crate::api::middleware::jwt_auth::bearer_token;
use crate::api::server::AppState;

/// Query parameters for the push handshake.
#[derive(Debug, Default, Deserialize)]
pub struct PushAuthParams {
    /// JWT for clients that cannot set headers on the upgrade request.
    pub token: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/notifications/ws", get(push_ws))
}

/// Authenticate, then upgrade to the push channel.
///
/// The credential is taken from `?token=` first, then from the
/// `Authorization: Bearer` header.
async fn push_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(auth): Query<PushAuthParams>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let jwt_service = state
        .jwt_service
        .as_ref()
        .ok_or_else(|| ApiError::unauthorized("Authentication not configured"))?;

    let token = match auth.token.as_deref().filter(|t| !t.is_empty()) {
        Some(token) => token,
        None => bearer_token(&headers)
            .map_err(|_| ApiError::unauthorized("Missing authorization token"))?,
    };

    let claims = jwt_service
        .validate_token(token)
        .map_err(|_| ApiError::unauthorized("Invalid or expired token"))?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, claims.sub)))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: String) {
    let registry = state.registry.clone();
    let handle = registry.register(&user_id);
    let cancel = handle.cancellation_token();
    let (mut sender, mut receiver) = socket.split();

    let period = state.delivery.heartbeat_interval;
    let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(connection_id = %handle.connection_id(), "Connection dropped by registry");
                let _ = sender.send(Message::Close(None)).await;
                break;
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        handle.touch();
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        handle.touch();
                        awaiting_pong = false;
                    }
                    // Clients have nothing to say on this channel; any frame
                    // still proves liveness.
                    Some(Ok(_)) => handle.touch(),
                    Some(Err(e)) => {
                        debug!(connection_id = %handle.connection_id(), "WebSocket error: {}", e);
                        break;
                    }
                }
            }

            event = handle.queue().recv() => {
                let Some(event) = event else {
                    break;
                };
                match event.to_json() {
                    Ok(json) => {
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            debug!(connection_id = %handle.connection_id(), "Failed to send event, client disconnected");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(event = event.event_name(), "Failed to encode push event: {}", e);
                    }
                }
            }

            _ = heartbeat.tick() => {
                if awaiting_pong {
                    debug!(connection_id = %handle.connection_id(), "Client failed to respond to Ping, closing connection");
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }
        }
    }

    registry.unregister(handle.connection_id());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_params_token_optional() {
        let params: PushAuthParams = serde_json::from_str("{}").unwrap();
        assert!(params.token.is_none());
        let params: PushAuthParams = serde_json::from_str(r#"{"token":"abc"}"#).unwrap();
        assert_eq!(params.token.as_deref(), Some("abc"));
    }
}
