//! InkRoom Core Library
//!
//! Transport-agnostic core of the InkRoom shared whiteboard: committed
//! operations, the per-room history with global undo/redo, room presence,
//! the wire protocol and a client-side replica.

pub mod client;
pub mod history;
pub mod operation;
pub mod palette;
pub mod protocol;
pub mod room;

pub use kurbo::Point;

pub use client::{CanvasView, CollaborationClient, SyncEvent};
pub use history::DrawingState;
pub use operation::{
    CompositeMode, Operation, OperationId, OperationKind, StrokeDraft, StrokeError, ToolKind,
    UserId,
};
pub use palette::{PALETTE, color_for};
pub use protocol::{ClientMessage, ProtocolError, ServerMessage};
pub use room::{Room, User, display_name};
