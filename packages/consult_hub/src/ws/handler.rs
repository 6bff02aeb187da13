//! WebSocket upgrade and per-connection plumbing.

use std::sync::Arc;

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::AppState;
use crate::auth;

use super::dispatch::dispatch;
use super::hub::ChatHub;
use super::protocol::ServerMessage;
use super::registry::ClientHandle;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// GET /ws?token=... authenticates, then hands the socket to the hub.
pub async fn chat_websocket_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(token) = query.token else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    match auth::authenticate_token(state.hub.repo(), &token).await {
        Ok(Some(participant_id)) => {
            let hub = state.hub.clone();
            ws.on_upgrade(move |socket| handle_chat_ws(socket, hub, participant_id))
        }
        Ok(None) => StatusCode::UNAUTHORIZED.into_response(),
        Err(e) => {
            error!("Token lookup failed: {e:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// One task drains the outbound channel into the socket; the read loop
/// dispatches inbound frames. Both halves terminate together.
pub async fn handle_chat_ws(socket: WebSocket, hub: Arc<ChatHub>, participant_id: i64) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    info!(%connection_id, participant_id, "WebSocket connected");

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(hub.config().send_channel_capacity);
    let handle = ClientHandle::new(connection_id.clone(), participant_id, tx);
    hub.registry().register(handle.clone()).await;

    let sender_task = async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    error!("Failed to serialize frame: {e}");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    };

    let hub_read = hub.clone();
    let handle_read = handle.clone();
    let read_task = async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => dispatch(&hub_read, &handle_read, &text).await,
                Ok(Message::Close(_)) => {
                    debug!(participant_id, "Client closed connection");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(participant_id, "WebSocket error: {e}");
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = sender_task => debug!(%connection_id, "Sender task ended"),
        _ = read_task => debug!(%connection_id, "Read task ended"),
    }

    // Transport cleanup only. The session stays live; the timeout supervisor
    // is the backstop for a participant that never comes back.
    hub.on_disconnect(&handle).await;
    info!(%connection_id, participant_id, "WebSocket disconnected");
}
