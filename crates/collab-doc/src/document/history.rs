//! Undo and redo stacks.

use crate::change::HistoryEntry;
use crate::clock::TimeTicket;
use crate::operation::RangeEdit;

/// Reverse entries of one local change, last applied first.
pub type HistoryGroup = Vec<HistoryEntry>;

/// Bounded undo stack plus a redo stack. Recording a new change clears the
/// redo stack; when the undo stack is full its oldest group is dropped.
#[derive(Debug, Clone)]
pub struct History {
    undo: Vec<HistoryGroup>,
    redo: Vec<HistoryGroup>,
    max_depth: usize,
}

impl History {
    pub fn new(max_depth: usize) -> Self {
        Self {
            undo: Vec::new(),
            redo: Vec::new(),
            max_depth,
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    /// Records the reverse of a new local change.
    pub fn push_undo(&mut self, group: HistoryGroup) {
        self.redo.clear();
        self.restore_undo(group);
    }

    /// Pushes the reverse of a redo without touching the redo stack.
    pub fn restore_undo(&mut self, group: HistoryGroup) {
        if group.is_empty() || self.max_depth == 0 {
            return;
        }
        if self.undo.len() == self.max_depth {
            self.undo.remove(0);
        }
        self.undo.push(group);
    }

    pub fn push_redo(&mut self, group: HistoryGroup) {
        if group.is_empty() || self.max_depth == 0 {
            return;
        }
        if self.redo.len() == self.max_depth {
            self.redo.remove(0);
        }
        self.redo.push(group);
    }

    pub fn pop_undo(&mut self) -> Option<HistoryGroup> {
        self.undo.pop()
    }

    pub fn pop_redo(&mut self) -> Option<HistoryGroup> {
        self.redo.pop()
    }

    /// Rewrites references to `prev` in both stacks after the element was
    /// re-created as `next`.
    pub fn reconcile_created_at(&mut self, prev: &TimeTicket, next: &TimeTicket) {
        for entry in self.undo.iter_mut().chain(self.redo.iter_mut()).flatten() {
            entry.reconcile_created_at(prev, next);
        }
    }

    /// Shifts range entries in both stacks over a remote sequence edit.
    pub fn reconcile_range(&mut self, edit: &RangeEdit) {
        for entry in self.undo.iter_mut().chain(self.redo.iter_mut()).flatten() {
            entry.reconcile_range(edit);
        }
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}
