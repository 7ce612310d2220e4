use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::state::AppState;

/// Courier identity is established upstream; the gateway trusts the query.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsParams {
    pub courier_id: Uuid,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.courier_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, courier_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();
    let (connection_id, mut outbound) = state.hub.register(courier_id);

    info!(connection_id = %connection_id, courier_id = %courier_id, "websocket client connected");

    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if sender.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    let hub = state.hub.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Text(text) => hub.handle_inbound(connection_id, &text).await,
                Message::Close(_) => break,
                _ => debug!(connection_id = %connection_id, "ignoring non-text frame"),
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.hub.unregister(connection_id);
    info!(connection_id = %connection_id, "websocket client disconnected");
}
