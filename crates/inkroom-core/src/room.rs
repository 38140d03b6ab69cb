//! Room state: present users, the operation history and color assignment.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::history::DrawingState;
use crate::operation::UserId;
use crate::palette::color_for;
use crate::protocol::ServerMessage;

/// Presence record for a connected session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Same as the session identifier.
    pub id: UserId,
    pub name: String,
    /// Palette color assigned on join.
    pub color: String,
}

impl User {
    pub fn new(id: impl Into<UserId>, color: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: display_name(&id),
            id,
            color: color.into(),
        }
    }
}

/// Display name derived from a session id: `User-` plus its first four characters.
pub fn display_name(id: &str) -> String {
    let prefix: String = id.chars().take(4).collect();
    format!("User-{prefix}")
}

/// One isolated canvas with its users and history.
#[derive(Debug, Default)]
pub struct Room {
    /// Present users in join order.
    users: IndexMap<UserId, User>,
    state: DrawingState,
    /// Next palette slot. Only ever advances.
    color_cursor: usize,
}

impl Room {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session and assign it the next palette color.
    ///
    /// Joining twice with the same session id returns the existing record.
    pub fn join(&mut self, session_id: &str) -> User {
        if let Some(user) = self.users.get(session_id) {
            return user.clone();
        }
        let user = User::new(session_id, color_for(self.color_cursor));
        self.color_cursor += 1;
        self.users.insert(user.id.clone(), user.clone());
        user
    }

    /// Remove a session's presence record. No-op if it is already gone.
    pub fn leave(&mut self, session_id: &str) -> Option<User> {
        self.users.shift_remove(session_id)
    }

    /// Present users in join order.
    pub fn users(&self) -> Vec<User> {
        self.users.values().cloned().collect()
    }

    pub fn user(&self, session_id: &str) -> Option<&User> {
        self.users.get(session_id)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn state(&self) -> &DrawingState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut DrawingState {
        &mut self.state
    }

    /// Full-state message for `me`: current users and the live snapshot.
    pub fn init_message(&self, me: &User) -> ServerMessage {
        ServerMessage::Init {
            me: me.clone(),
            users: self.users(),
            ops: self.state.snapshot(),
        }
    }
}
