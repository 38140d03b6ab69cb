//! Room registry.
//!
//! Each room is an independent unit: its state sits behind its own mutex and
//! it owns its own broadcast channel, so traffic in one room never waits on
//! another. Every mutation broadcasts while still holding the room lock, which
//! makes the order of events on the channel match the order of mutations, and
//! lets a joining session take its snapshot and subscribe atomically.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use inkroom_core::{OperationId, Room, ServerMessage, StrokeDraft, User};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Default capacity of a room's broadcast channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Who a broadcast is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Every member, the sender included.
    All,
    /// Every member except the sender.
    Others,
}

/// A message on a room's broadcast channel.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Session that caused the message.
    pub from: String,
    pub audience: Audience,
    pub msg: Arc<ServerMessage>,
}

impl Envelope {
    /// Whether the given session should receive this message.
    pub fn is_for(&self, session_id: &str) -> bool {
        match self.audience {
            Audience::All => true,
            Audience::Others => self.from != session_id,
        }
    }
}

/// What a session gets back from joining a room.
pub struct Joined {
    pub user: User,
    /// Full state for the new connection only.
    pub init: ServerMessage,
    pub rx: broadcast::Receiver<Envelope>,
}

/// Shared handle to one room.
pub struct RoomHandle {
    id: String,
    room: Mutex<Room>,
    tx: broadcast::Sender<Envelope>,
}

impl RoomHandle {
    fn new(id: &str, channel_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            id: id.to_string(),
            room: Mutex::new(Room::new()),
            tx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Lock the room state. Poisoning is ignored.
    pub fn lock(&self) -> MutexGuard<'_, Room> {
        self.room.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, from: &str, audience: Audience, msg: ServerMessage) {
        // An error only means nobody is subscribed.
        let _ = self.tx.send(Envelope {
            from: from.to_string(),
            audience,
            msg: Arc::new(msg),
        });
    }

    /// Register a session, subscribe it and announce it to the other members.
    pub fn join(&self, session_id: &str) -> Joined {
        let mut room = self.lock();
        let user = room.join(session_id);
        let init = room.init_message(&user);
        self.send(session_id, Audience::Others, ServerMessage::UserJoin(user.clone()));
        let rx = self.tx.subscribe();
        info!("{} joined room {} ({} users)", user.name, self.id, room.user_count());
        Joined { user, init, rx }
    }

    /// Remove a session and tell the remaining members. No-op if already gone.
    pub fn leave(&self, session_id: &str) -> Option<User> {
        let mut room = self.lock();
        let user = room.leave(session_id)?;
        self.send(
            session_id,
            Audience::Others,
            ServerMessage::UserLeave { id: user.id.clone() },
        );
        info!("{} left room {} ({} users)", user.name, self.id, room.user_count());
        Some(user)
    }

    /// Append a stroke and broadcast it to every member, the sender included.
    pub fn commit(&self, session_id: &str, draft: StrokeDraft) -> OperationId {
        let mut room = self.lock();
        let op = room.state_mut().append(session_id, draft);
        let id = op.id();
        debug!("room {}: op {} from {}", self.id, id, session_id);
        self.send(session_id, Audience::All, ServerMessage::OpAdd(op));
        id
    }

    /// Global undo. Broadcasts only when something was undone.
    pub fn undo(&self, session_id: &str) -> Option<OperationId> {
        let mut room = self.lock();
        let id = room.state_mut().undo()?;
        debug!("room {}: {} undid {}", self.id, session_id, id);
        self.send(session_id, Audience::All, ServerMessage::OpUndone { id });
        Some(id)
    }

    /// Global redo. Broadcasts only when something was redone.
    pub fn redo(&self, session_id: &str) -> Option<OperationId> {
        let mut room = self.lock();
        let id = room.state_mut().redo()?;
        debug!("room {}: {} redid {}", self.id, session_id, id);
        self.send(session_id, Audience::All, ServerMessage::OpRedone { id });
        Some(id)
    }

    /// Forward an ephemeral message to the other members. Never touches state.
    pub fn relay(&self, session_id: &str, msg: ServerMessage) {
        self.send(session_id, Audience::Others, msg);
    }

    /// Fresh snapshot plus a receiver that starts right after it.
    ///
    /// Replaces a lagged receiver: everything still buffered on the old one
    /// is already reflected in the snapshot.
    pub fn resync(&self, me: &User) -> (ServerMessage, broadcast::Receiver<Envelope>) {
        let room = self.lock();
        let init = room.init_message(me);
        (init, self.tx.subscribe())
    }

    /// Current full state as seen by `me`.
    pub fn init_message(&self, me: &User) -> ServerMessage {
        self.lock().init_message(me)
    }

    pub fn user_count(&self) -> usize {
        self.lock().user_count()
    }
}

/// Registry of all rooms, created lazily on first join.
pub struct Rooms {
    rooms: DashMap<String, Arc<RoomHandle>>,
    channel_capacity: usize,
}

impl Rooms {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            channel_capacity,
        }
    }

    /// Get or create a room.
    pub fn ensure_room(&self, room_id: &str) -> Arc<RoomHandle> {
        self.rooms
            .entry(room_id.to_string())
            .or_insert_with(|| {
                info!("Created room {}", room_id);
                Arc::new(RoomHandle::new(room_id, self.channel_capacity))
            })
            .clone()
    }

    /// Join a session to a room, creating the room if needed.
    pub fn join(&self, room_id: &str, session_id: &str) -> (Arc<RoomHandle>, Joined) {
        let room = self.ensure_room(room_id);
        let joined = room.join(session_id);
        (room, joined)
    }

    /// Remove a session from a room. No-op for unknown rooms or sessions.
    pub fn leave(&self, room_id: &str, session_id: &str) -> Option<User> {
        let room = self.get(room_id)?;
        room.leave(session_id)
    }

    pub fn get(&self, room_id: &str) -> Option<Arc<RoomHandle>> {
        self.rooms.get(room_id).map(|entry| entry.value().clone())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Users present in a room, zero for unknown rooms.
    pub fn user_count(&self, room_id: &str) -> usize {
        self.get(room_id).map_or(0, |room| room.user_count())
    }
}

impl Default for Rooms {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkroom_core::{PALETTE, Point, ToolKind};

    fn stroke() -> StrokeDraft {
        StrokeDraft::new(ToolKind::Brush, "#000", 3.0)
            .with_points(vec![Point::new(0.0, 0.0), Point::new(5.0, 5.0)])
    }

    #[test]
    fn test_ensure_room_is_idempotent() {
        let rooms = Rooms::default();
        let a = rooms.ensure_room("lobby");
        let b = rooms.ensure_room("lobby");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(rooms.room_count(), 1);
    }

    #[test]
    fn test_join_assigns_palette_colors_in_order() {
        let rooms = Rooms::default();
        let (_, alice) = rooms.join("lobby", "alice");
        let (_, bob) = rooms.join("lobby", "bob");
        assert_eq!(alice.user.color, PALETTE[0]);
        assert_eq!(bob.user.color, PALETTE[1]);
        assert_eq!(rooms.user_count("lobby"), 2);
    }

    #[test]
    fn test_leave_unknown_is_noop() {
        let rooms = Rooms::default();
        assert!(rooms.leave("nowhere", "ghost").is_none());
        assert_eq!(rooms.room_count(), 0);

        rooms.join("lobby", "alice");
        assert!(rooms.leave("lobby", "alice").is_some());
        assert!(rooms.leave("lobby", "alice").is_none());
        assert_eq!(rooms.user_count("lobby"), 0);
    }

    #[test]
    fn test_join_announces_to_others_only() {
        let rooms = Rooms::default();
        let (_, mut alice) = rooms.join("lobby", "alice");
        let (_, bob) = rooms.join("lobby", "bob");

        let env = alice.rx.try_recv().unwrap();
        assert!(env.is_for("alice"));
        assert!(!env.is_for("bob"));
        assert_eq!(*env.msg, ServerMessage::UserJoin(bob.user));
    }

    #[test]
    fn test_undo_without_ops_does_not_broadcast() {
        let rooms = Rooms::default();
        let (room, mut joined) = rooms.join("lobby", "alice");
        assert_eq!(room.undo("alice"), None);
        assert_eq!(room.redo("alice"), None);
        assert!(joined.rx.try_recv().is_err());
    }

    #[test]
    fn test_commit_reaches_everyone_in_order() {
        let rooms = Rooms::default();
        let (room, mut alice) = rooms.join("lobby", "alice");
        let id = room.commit("alice", stroke());
        assert_eq!(room.undo("alice"), Some(id));

        let add = alice.rx.try_recv().unwrap();
        assert!(add.is_for("alice"));
        match &*add.msg {
            ServerMessage::OpAdd(op) => {
                assert_eq!(op.id(), id);
                assert_eq!(op.tool(), ToolKind::Brush);
            }
            other => panic!("unexpected message: {other:?}"),
        }
        let undone = alice.rx.try_recv().unwrap();
        assert_eq!(*undone.msg, ServerMessage::OpUndone { id });
    }

    #[test]
    fn test_resync_skips_messages_already_in_snapshot() {
        let rooms = Rooms::default();
        let (room, mut alice) = rooms.join("lobby", "alice");
        room.commit("alice", stroke());
        room.commit("alice", stroke());

        let (init, mut rx) = room.resync(&alice.user);
        match init {
            ServerMessage::Init { ops, .. } => assert_eq!(ops.len(), 2),
            other => panic!("unexpected message: {other:?}"),
        }
        assert!(rx.try_recv().is_err());
        // The old receiver still holds both adds.
        assert!(alice.rx.try_recv().is_ok());

        let id = room.commit("alice", stroke());
        match &*rx.try_recv().unwrap().msg {
            ServerMessage::OpAdd(op) => assert_eq!(op.id(), id),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_late_joiner_snapshot_excludes_undone() {
        let rooms = Rooms::default();
        let (room, _alice) = rooms.join("lobby", "alice");
        let kept = room.commit("alice", stroke());
        room.commit("alice", stroke());
        room.undo("alice");

        let (_, bob) = rooms.join("lobby", "bob");
        match bob.init {
            ServerMessage::Init { ops, users, .. } => {
                assert_eq!(ops.len(), 1);
                assert_eq!(ops[0].id(), kept);
                assert_eq!(users.len(), 2);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_rooms_are_isolated() {
        let rooms = Rooms::default();
        let (x, _) = rooms.join("x", "alice");
        let (_, mut y) = rooms.join("y", "bob");
        x.commit("alice", stroke());
        assert!(y.rx.try_recv().is_err());
        assert_eq!(rooms.room_count(), 2);
    }
}
