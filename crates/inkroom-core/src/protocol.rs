//! Wire protocol between whiteboard clients and the room server.
//!
//! Every frame is a JSON text message naming an event and carrying its
//! payload:
//! ```json
//! { "event": "stroke:commit", "data": { "points": [{ "x": 1, "y": 2 }], "tool": "brush", "color": "#000", "size": 4 } }
//! { "event": "undo", "data": {} }
//! { "event": "redo" }
//! { "event": "op:undone", "data": { "id": "6f1c..." } }
//! ```
//! Client events without a payload (`undo`, `redo`, `request:snapshot`,
//! `ping`) are accepted with `data` omitted or `null`.
//! Adjacent tagging keeps the payload free to carry its own `type` field
//! (see [`Operation`]).

use kurbo::Point;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::operation::{Operation, OperationId, StrokeDraft, StrokeError, ToolKind, UserId};
use crate::room::User;

/// Messages sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientMessage {
    /// Pointer moved.
    #[serde(rename = "cursor")]
    Cursor(Point),
    /// Batch of points from a stroke still being drawn.
    #[serde(rename = "stroke:preview")]
    StrokePreview(StrokeDraft),
    /// Finished stroke with its full point path.
    #[serde(rename = "stroke:commit")]
    StrokeCommit(StrokeDraft),
    #[serde(rename = "undo")]
    Undo {},
    #[serde(rename = "redo")]
    Redo {},
    /// Ask for a fresh `init` with the current snapshot.
    #[serde(rename = "request:snapshot")]
    RequestSnapshot {},
    /// Liveness probe, answered with `pong` to the sender only.
    #[serde(rename = "ping")]
    Ping {},
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Full room state for one connection.
    #[serde(rename = "init")]
    Init {
        me: User,
        users: Vec<User>,
        ops: Vec<Operation>,
    },
    #[serde(rename = "user:join")]
    UserJoin(User),
    #[serde(rename = "user:leave")]
    UserLeave { id: UserId },
    #[serde(rename = "cursor")]
    Cursor { user_id: UserId, x: f64, y: f64 },
    #[serde(rename = "stroke:preview")]
    StrokePreview {
        user_id: UserId,
        points: Vec<Point>,
        tool: ToolKind,
        color: String,
        size: f64,
    },
    #[serde(rename = "op:add")]
    OpAdd(Operation),
    #[serde(rename = "op:undone")]
    OpUndone { id: OperationId },
    /// An operation came back. Clients re-request a snapshot.
    #[serde(rename = "op:redone")]
    OpRedone { id: OperationId },
    #[serde(rename = "pong")]
    Pong {},
}

/// Why an inbound frame was dropped.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid stroke: {0}")]
    Stroke(#[from] StrokeError),
    #[error("cursor position is not finite")]
    NonFiniteCursor,
}

impl ClientMessage {
    /// Decode and validate a text frame.
    ///
    /// Events without a payload may omit `data` or send `null`.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let mut frame: serde_json::Value = serde_json::from_str(text)?;
        if let Some(fields) = frame.as_object_mut() {
            let data = fields.entry("data").or_insert(serde_json::Value::Null);
            if data.is_null() {
                *data = serde_json::Value::Object(serde_json::Map::new());
            }
        }
        let msg: ClientMessage = serde_json::from_value(frame)?;
        msg.validate()?;
        Ok(msg)
    }

    /// Check payload invariants that the JSON shape alone does not enforce.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            ClientMessage::Cursor(pos) if !pos.is_finite() => Err(ProtocolError::NonFiniteCursor),
            ClientMessage::StrokePreview(draft) => Ok(draft.validate_preview()?),
            ClientMessage::StrokeCommit(draft) => Ok(draft.validate()?),
            _ => Ok(()),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ServerMessage {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Event name as it appears on the wire.
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::Init { .. } => "init",
            ServerMessage::UserJoin(_) => "user:join",
            ServerMessage::UserLeave { .. } => "user:leave",
            ServerMessage::Cursor { .. } => "cursor",
            ServerMessage::StrokePreview { .. } => "stroke:preview",
            ServerMessage::OpAdd(_) => "op:add",
            ServerMessage::OpUndone { .. } => "op:undone",
            ServerMessage::OpRedone { .. } => "op:redone",
            ServerMessage::Pong {} => "pong",
        }
    }
}
