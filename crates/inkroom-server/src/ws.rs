//! WebSocket endpoint.

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use inkroom_core::ServerMessage;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::AppState;
use crate::session::Session;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Room to join; the configured default room when absent or empty
    pub room: Option<String>,
}

impl WsQuery {
    /// Requested room taken verbatim, or `default` when absent or empty.
    pub fn room_id(self, default: &str) -> String {
        self.room
            .filter(|room| !room.is_empty())
            .unwrap_or_else(|| default.to_string())
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let room_id = query.room_id(&state.config.default_room);
    ws.on_upgrade(move |socket| handle_socket(socket, state, room_id))
}

fn encode(msg: &ServerMessage) -> Option<Message> {
    match msg.to_json() {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            error!("Failed to encode {}: {}", msg.event_name(), e);
            None
        }
    }
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState, room_id: String) {
    let (mut sender, mut receiver) = socket.split();
    let (mut session, init) = Session::join(&state.rooms, &room_id);
    info!(
        "New connection {} in room {} ({} users, {} rooms)",
        session.id(),
        room_id,
        state.rooms.user_count(&room_id),
        state.rooms.room_count()
    );

    if let Some(frame) = encode(&init) {
        if sender.send(frame).await.is_err() {
            session.close();
            return;
        }
    }

    loop {
        tokio::select! {
            // Handle incoming messages from client
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = session.handle_text(text.as_str()) {
                            if let Some(frame) = encode(&reply) {
                                if sender.send(frame).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // Binary frames are not part of the protocol; ping/pong is handled by axum
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", session.id(), e);
                        break;
                    }
                }
            }

            // Handle messages addressed to this connection
            msg = session.recv() => {
                let Some(server_msg) = msg else { break };
                if let Some(frame) = encode(&server_msg) {
                    if sender.send(frame).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    // Cleanup on disconnect
    session.close();
    info!("Connection closed: {}", session.id());
}
