//! Per-room operation history with global undo/redo.
//!
//! The log is append-only. Undo never removes a record, it tombstones it by
//! setting the `undone` flag, so redo can bring the exact same operation back
//! and a snapshot is a pure filter over the log.
//!
//! Undo scans backwards for the newest live operation; redo scans forwards for
//! the oldest tombstoned one. Because undo tombstones in LIFO order, the oldest
//! tombstone is always the one undone last, so the pair behaves like a single
//! shared undo stack for the whole room.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::operation::{Operation, OperationId, StrokeDraft};

/// Ordered operation log of one room.
#[derive(Debug, Clone, Default)]
pub struct DrawingState {
    ops: Vec<Operation>,
    /// Timestamp of the newest record, used to keep `ts` non-decreasing.
    last_ts: u64,
}

impl DrawingState {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// All live (not undone) operations in append order.
    pub fn snapshot(&self) -> Vec<Operation> {
        self.ops.iter().filter(|op| !op.is_undone()).cloned().collect()
    }

    /// Finalize a draft and append it to the end of the log.
    pub fn append(&mut self, user_id: &str, draft: StrokeDraft) -> Operation {
        self.append_at(user_id, draft, now_millis())
    }

    /// Append with an explicit clock reading.
    pub fn append_at(&mut self, user_id: &str, draft: StrokeDraft, now: u64) -> Operation {
        let ts = now.max(self.last_ts);
        self.last_ts = ts;
        let op = Operation::from_draft(user_id, draft, ts);
        self.ops.push(op.clone());
        op
    }

    /// Tombstone the newest live operation.
    ///
    /// Returns `None` when there is nothing to undo.
    pub fn undo(&mut self) -> Option<OperationId> {
        let op = self.ops.iter_mut().rev().find(|op| !op.is_undone())?;
        op.set_undone(true);
        log::debug!("undo {}", op.id());
        Some(op.id())
    }

    /// Restore the oldest tombstoned operation.
    ///
    /// Returns `None` when there is nothing to redo.
    pub fn redo(&mut self) -> Option<OperationId> {
        let op = self.ops.iter_mut().find(|op| op.is_undone())?;
        op.set_undone(false);
        log::debug!("redo {}", op.id());
        Some(op.id())
    }

    /// Every record, tombstoned ones included, in append order.
    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.ops.iter()
    }

    /// Look up a record by id, tombstoned or not.
    pub fn get(&self, id: OperationId) -> Option<&Operation> {
        self.ops.iter().find(|op| op.id() == id)
    }

    /// Total number of records.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of live operations.
    pub fn active_count(&self) -> usize {
        self.ops.iter().filter(|op| !op.is_undone()).count()
    }

    /// Number of tombstoned operations.
    pub fn undone_count(&self) -> usize {
        self.ops.len() - self.active_count()
    }

    pub fn can_undo(&self) -> bool {
        self.ops.iter().any(|op| !op.is_undone())
    }

    pub fn can_redo(&self) -> bool {
        self.ops.iter().any(|op| op.is_undone())
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
