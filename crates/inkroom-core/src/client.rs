//! Client-side replica of a room.
//!
//! `CollaborationClient` is transport-agnostic: it queues outgoing frames as
//! JSON strings and consumes incoming server frames, keeping a local copy of
//! the visible operations, the user list, remote cursors and remote previews.
//! Rate limiting of cursor and preview traffic happens here, the server relays
//! whatever it receives.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use kurbo::{Point, Rect};

use crate::operation::{Operation, OperationId, StrokeDraft, ToolKind, UserId};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::room::User;

/// Minimum spacing between two cursor frames.
pub const CURSOR_INTERVAL: Duration = Duration::from_millis(40);

/// How long preview points are buffered before they are sent as one batch.
pub const PREVIEW_BATCH_INTERVAL: Duration = Duration::from_millis(30);

const DEFAULT_COLOR: &str = "#0b63ff";
const DEFAULT_SIZE: f64 = 6.0;

/// Rendering collaborator driven by the replica.
///
/// Implementations turn operations into pixels; the replica only tells them
/// what changed.
pub trait CanvasView {
    /// Redraw everything from an empty canvas.
    fn replay(&mut self, ops: &[Operation]);
    /// Draw one new operation on top.
    fn append(&mut self, op: &Operation);
    /// Drop an operation that was undone.
    fn remove(&mut self, id: OperationId);
}

/// What an incoming frame changed.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Full state received (on join or after a snapshot request).
    Initialized { me: User, users: usize, ops: usize },
    UserJoined(User),
    UserLeft { id: UserId },
    CursorMoved { user_id: UserId, position: Point },
    PreviewUpdated { user_id: UserId },
    OperationAdded { id: OperationId },
    /// An operation was removed; `bounds` is the canvas area to repaint.
    OperationUndone { id: OperationId, bounds: Option<Rect> },
    /// An operation was restored; a snapshot request has been queued.
    OperationRedone { id: OperationId },
    /// Round trip of the last `ping`.
    Latency(Duration),
}

/// Stroke the local user is currently drawing.
#[derive(Debug, Clone)]
struct LocalStroke {
    /// Full path so far, sent on commit.
    draft: StrokeDraft,
    /// Points not yet sent as a preview.
    batch: Vec<Point>,
    /// When the oldest buffered point was added.
    batch_started: Option<Instant>,
}

/// Client-side state and outgoing queue for one room connection.
pub struct CollaborationClient {
    me: Option<User>,
    users: IndexMap<UserId, User>,
    /// Visible operations in canvas order.
    history: Vec<Operation>,
    cursors: HashMap<UserId, Point>,
    previews: HashMap<UserId, StrokeDraft>,
    tool: ToolKind,
    color: String,
    size: f64,
    stroke: Option<LocalStroke>,
    last_cursor_sent: Option<Instant>,
    ping_sent: Option<Instant>,
    /// Pending outgoing messages (JSON strings).
    outgoing: Vec<String>,
    view: Option<Box<dyn CanvasView + Send>>,
}

impl CollaborationClient {
    pub fn new() -> Self {
        Self {
            me: None,
            users: IndexMap::new(),
            history: Vec::new(),
            cursors: HashMap::new(),
            previews: HashMap::new(),
            tool: ToolKind::Brush,
            color: DEFAULT_COLOR.to_string(),
            size: DEFAULT_SIZE,
            stroke: None,
            last_cursor_sent: None,
            ping_sent: None,
            outgoing: Vec::new(),
            view: None,
        }
    }

    /// Attach a renderer that mirrors every history change.
    pub fn with_view(mut self, view: Box<dyn CanvasView + Send>) -> Self {
        self.view = Some(view);
        self
    }

    // --- Local state ---

    /// Our own presence record, once `init` has arrived.
    pub fn me(&self) -> Option<&User> {
        self.me.as_ref()
    }

    /// Users in the room, in join order.
    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    pub fn user(&self, id: &str) -> Option<&User> {
        self.users.get(id)
    }

    /// Visible operations in canvas order.
    pub fn history(&self) -> &[Operation] {
        &self.history
    }

    pub fn cursor(&self, user_id: &str) -> Option<Point> {
        self.cursors.get(user_id).copied()
    }

    /// In-progress stroke of another user.
    pub fn preview(&self, user_id: &str) -> Option<&StrokeDraft> {
        self.previews.get(user_id)
    }

    pub fn tool(&self) -> ToolKind {
        self.tool
    }

    pub fn set_tool(&mut self, tool: ToolKind) {
        self.tool = tool;
    }

    pub fn color(&self) -> &str {
        &self.color
    }

    pub fn set_color(&mut self, color: impl Into<String>) {
        self.color = color.into();
    }

    pub fn size(&self) -> f64 {
        self.size
    }

    pub fn set_size(&mut self, size: f64) {
        self.size = size;
    }

    /// Whether a local stroke is in progress.
    pub fn is_drawing(&self) -> bool {
        self.stroke.is_some()
    }

    /// Path of the local stroke in progress.
    pub fn local_stroke(&self) -> Option<&StrokeDraft> {
        self.stroke.as_ref().map(|s| &s.draft)
    }

    // --- Outgoing ---

    /// Take pending outgoing messages (drains the queue).
    pub fn take_outgoing(&mut self) -> Vec<String> {
        std::mem::take(&mut self.outgoing)
    }

    /// Check if there are pending outgoing messages.
    pub fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty()
    }

    fn queue(&mut self, msg: ClientMessage) {
        match msg.to_json() {
            Ok(json) => self.outgoing.push(json),
            Err(e) => log::warn!("failed to encode outgoing message: {e}"),
        }
    }

    pub fn undo(&mut self) {
        self.queue(ClientMessage::Undo {});
    }

    pub fn redo(&mut self) {
        self.queue(ClientMessage::Redo {});
    }

    pub fn request_snapshot(&mut self) {
        self.queue(ClientMessage::RequestSnapshot {});
    }

    /// Start a latency probe.
    pub fn ping(&mut self, now: Instant) {
        self.ping_sent = Some(now);
        self.queue(ClientMessage::Ping {});
    }

    /// Report the pointer position. Returns whether a frame was queued.
    pub fn set_cursor(&mut self, position: Point, now: Instant) -> bool {
        let due = self
            .last_cursor_sent
            .is_none_or(|last| now.saturating_duration_since(last) > CURSOR_INTERVAL);
        if due {
            self.last_cursor_sent = Some(now);
            self.queue(ClientMessage::Cursor(position));
        }
        due
    }

    // --- Local drawing ---

    /// Begin a stroke with the current tool settings.
    pub fn begin_stroke(&mut self, point: Point, now: Instant) {
        let draft =
            StrokeDraft::new(self.tool, self.color.clone(), self.size).with_points(vec![point]);
        self.stroke = Some(LocalStroke {
            draft,
            batch: vec![point],
            batch_started: Some(now),
        });
    }

    /// Add a point to the stroke in progress, flushing a preview batch when due.
    pub fn extend_stroke(&mut self, point: Point, now: Instant) {
        let Some(stroke) = self.stroke.as_mut() else {
            return;
        };
        stroke.draft.points.push(point);
        stroke.batch.push(point);
        stroke.batch_started.get_or_insert(now);
        self.flush_preview(now);
    }

    /// Send buffered preview points if the batch interval has elapsed.
    pub fn flush_preview(&mut self, now: Instant) {
        let Some(stroke) = self.stroke.as_mut() else {
            return;
        };
        let due = stroke
            .batch_started
            .is_some_and(|started| now.saturating_duration_since(started) >= PREVIEW_BATCH_INTERVAL);
        if !due || stroke.batch.is_empty() {
            return;
        }
        let points = std::mem::take(&mut stroke.batch);
        stroke.batch_started = None;
        let preview = StrokeDraft::new(stroke.draft.tool, stroke.draft.color.clone(), stroke.draft.size)
            .with_points(points);
        self.queue(ClientMessage::StrokePreview(preview));
    }

    /// Finish the stroke and queue its commit.
    ///
    /// Returns the committed draft, or `None` if no stroke was in progress.
    pub fn end_stroke(&mut self) -> Option<StrokeDraft> {
        let stroke = self.stroke.take()?;
        self.queue(ClientMessage::StrokeCommit(stroke.draft.clone()));
        Some(stroke.draft)
    }

    // --- Incoming Message Handling ---

    /// Handle an incoming server frame.
    /// Returns a SyncEvent describing what happened.
    pub fn handle_message(&mut self, json: &str, now: Instant) -> Option<SyncEvent> {
        match ServerMessage::from_json(json) {
            Ok(msg) => self.apply(msg, now),
            Err(e) => {
                log::debug!("ignoring malformed server frame: {e}");
                None
            }
        }
    }

    /// Apply a decoded server message to the replica.
    pub fn apply(&mut self, msg: ServerMessage, now: Instant) -> Option<SyncEvent> {
        match msg {
            ServerMessage::Init { me, users, ops } => {
                self.users = users.into_iter().map(|u| (u.id.clone(), u)).collect();
                self.cursors.retain(|id, _| self.users.contains_key(id));
                self.previews.retain(|id, _| self.users.contains_key(id));
                self.history = ops;
                if let Some(view) = self.view.as_mut() {
                    view.replay(&self.history);
                }
                if self.me.is_none() {
                    self.color = me.color.clone();
                }
                self.me = Some(me.clone());
                Some(SyncEvent::Initialized {
                    me,
                    users: self.users.len(),
                    ops: self.history.len(),
                })
            }
            ServerMessage::UserJoin(user) => {
                self.users.insert(user.id.clone(), user.clone());
                Some(SyncEvent::UserJoined(user))
            }
            ServerMessage::UserLeave { id } => {
                self.users.shift_remove(&id);
                self.cursors.remove(&id);
                self.previews.remove(&id);
                Some(SyncEvent::UserLeft { id })
            }
            ServerMessage::Cursor { user_id, x, y } => {
                let position = Point::new(x, y);
                self.cursors.insert(user_id.clone(), position);
                Some(SyncEvent::CursorMoved { user_id, position })
            }
            ServerMessage::StrokePreview {
                user_id,
                points,
                tool,
                color,
                size,
            } => {
                let preview = self
                    .previews
                    .entry(user_id.clone())
                    .or_insert_with(|| StrokeDraft::new(tool, color.clone(), size));
                preview.tool = tool;
                preview.color = color;
                preview.size = size;
                preview.points.extend(points);
                Some(SyncEvent::PreviewUpdated { user_id })
            }
            ServerMessage::OpAdd(op) => {
                let id = op.id();
                self.previews.remove(op.user_id());
                if self.history.iter().any(|known| known.id() == id) {
                    log::debug!("ignoring duplicate op:add {id}");
                    return None;
                }
                if let Some(view) = self.view.as_mut() {
                    view.append(&op);
                }
                self.history.push(op);
                Some(SyncEvent::OperationAdded { id })
            }
            ServerMessage::OpUndone { id } => {
                let index = self.history.iter().position(|op| op.id() == id);
                let bounds = index.map(|index| self.history.remove(index).bounds());
                if let Some(view) = self.view.as_mut() {
                    view.remove(id);
                }
                Some(SyncEvent::OperationUndone { id, bounds })
            }
            ServerMessage::OpRedone { id } => {
                // Restored operations may sit anywhere in the canvas order.
                self.request_snapshot();
                Some(SyncEvent::OperationRedone { id })
            }
            ServerMessage::Pong {} => {
                let sent = self.ping_sent.take()?;
                Some(SyncEvent::Latency(now.saturating_duration_since(sent)))
            }
        }
    }
}

impl Default for CollaborationClient {
    fn default() -> Self {
        Self::new()
    }
}
