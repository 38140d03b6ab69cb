//! Per-connection session coordinator.
//!
//! A session binds one transport connection to one user in one room for its
//! whole lifetime. It applies client events to the room and yields the
//! messages addressed to its connection. Leaving the room happens exactly once,
//! either through [`Session::close`] or when the session is dropped.

use std::sync::Arc;

use inkroom_core::{ClientMessage, ServerMessage, User};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::rooms::{Envelope, RoomHandle, Rooms};

/// Lifecycle of a session. Connecting is the WebSocket handshake, before a
/// `Session` exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Joined,
    Disconnected,
}

pub struct Session {
    id: String,
    user: User,
    room: Arc<RoomHandle>,
    rx: broadcast::Receiver<Envelope>,
    phase: SessionPhase,
}

impl Session {
    /// Join a room under a fresh session id.
    ///
    /// Returns the session and the `init` message for this connection.
    pub fn join(rooms: &Rooms, room_id: &str) -> (Self, ServerMessage) {
        Self::join_with_id(rooms, room_id, Uuid::new_v4().simple().to_string())
    }

    /// Join a room under a caller-chosen session id.
    pub fn join_with_id(rooms: &Rooms, room_id: &str, id: String) -> (Self, ServerMessage) {
        let (room, joined) = rooms.join(room_id, &id);
        let session = Self {
            id,
            user: joined.user,
            room,
            rx: joined.rx,
            phase: SessionPhase::Joined,
        };
        (session, joined.init)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn room_id(&self) -> &str {
        self.room.id()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Handle a raw text frame. Malformed frames are dropped.
    pub fn handle_text(&self, text: &str) -> Option<ServerMessage> {
        match ClientMessage::parse(text) {
            Ok(msg) => self.dispatch(msg),
            Err(e) => {
                warn!("Dropping message from {}: {}", self.id, e);
                None
            }
        }
    }

    /// Validate and apply a client event built outside the wire decoder.
    ///
    /// Broadcasts go out on the room channel; the return value is a reply for
    /// this connection only.
    pub fn handle(&self, msg: ClientMessage) -> Option<ServerMessage> {
        if let Err(e) = msg.validate() {
            warn!("Dropping message from {}: {}", self.id, e);
            return None;
        }
        self.dispatch(msg)
    }

    /// Apply an already validated client event.
    fn dispatch(&self, msg: ClientMessage) -> Option<ServerMessage> {
        if self.phase == SessionPhase::Disconnected {
            return None;
        }

        match msg {
            ClientMessage::Cursor(pos) => {
                self.room.relay(
                    &self.id,
                    ServerMessage::Cursor {
                        user_id: self.id.clone(),
                        x: pos.x,
                        y: pos.y,
                    },
                );
                None
            }
            ClientMessage::StrokePreview(draft) => {
                self.room.relay(
                    &self.id,
                    ServerMessage::StrokePreview {
                        user_id: self.id.clone(),
                        points: draft.points,
                        tool: draft.tool,
                        color: draft.color,
                        size: draft.size,
                    },
                );
                None
            }
            ClientMessage::StrokeCommit(draft) => {
                self.room.commit(&self.id, draft);
                None
            }
            ClientMessage::Undo {} => {
                if self.room.undo(&self.id).is_none() {
                    debug!("Nothing to undo in room {}", self.room.id());
                }
                None
            }
            ClientMessage::Redo {} => {
                if self.room.redo(&self.id).is_none() {
                    debug!("Nothing to redo in room {}", self.room.id());
                }
                None
            }
            ClientMessage::RequestSnapshot {} => Some(self.room.init_message(&self.user)),
            ClientMessage::Ping {} => Some(ServerMessage::Pong {}),
        }
    }

    /// Wait for the next message addressed to this connection.
    ///
    /// Returns `None` once the session is closed. A receiver that fell behind
    /// the channel is resynchronised with a full snapshot, and whatever it had
    /// buffered before the snapshot is discarded.
    pub async fn recv(&mut self) -> Option<Arc<ServerMessage>> {
        loop {
            if self.phase == SessionPhase::Disconnected {
                return None;
            }
            match self.rx.recv().await {
                Ok(env) if env.is_for(&self.id) => return Some(env.msg),
                Ok(_) => continue,
                Err(RecvError::Lagged(n)) => {
                    warn!("Session {} lagged {} messages, sending snapshot", self.id, n);
                    let (init, rx) = self.room.resync(&self.user);
                    self.rx = rx;
                    return Some(Arc::new(init));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Leave the room. Only the first call has any effect.
    pub fn close(&mut self) {
        if self.phase == SessionPhase::Disconnected {
            return;
        }
        self.phase = SessionPhase::Disconnected;
        self.room.leave(&self.id);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
