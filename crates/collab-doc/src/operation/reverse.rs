//! Reverses of sequence edits, kept as visible index ranges.
//!
//! Undo and redo re-create text and tree content under new tickets, so a
//! reverse anchored on node positions would point at nodes that no longer
//! hold the content. A [`RangeReverse`] is resolved to positions only when
//! it is replayed, and remote edits shift it in the meantime.

use std::collections::BTreeMap;

use super::{
    EditOperation, Operation, RemoveAttributeOperation, SetAttributeOperation, StyleOperation,
    TreeEditOperation,
};
use crate::clock::{TicketFactory, TimeTicket};
use crate::crdt::tree::TreeNodeData;
use crate::crdt::CrdtRoot;
use crate::error::DocError;

/// What executing an operation leaves for undo.
#[derive(Debug, Clone, PartialEq)]
pub enum Reverse {
    /// Element operations keep their ticket addressing.
    Op(Operation),
    Range(RangeReverse),
}

impl From<Operation> for Reverse {
    fn from(op: Operation) -> Self {
        Reverse::Op(op)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RangeAction {
    TextEdit {
        content: String,
        attributes: BTreeMap<String, String>,
    },
    TextStyle {
        attributes: BTreeMap<String, String>,
        attributes_to_remove: Vec<String>,
    },
    TreeEdit {
        contents: Vec<TreeNodeData>,
    },
    SetAttribute {
        attributes: BTreeMap<String, String>,
    },
    RemoveAttribute {
        keys: Vec<String>,
    },
}

/// `action` applied over the visible range `[from, to)` of the sequence
/// `parent_created_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeReverse {
    pub parent_created_at: TimeTicket,
    pub from: usize,
    pub to: usize,
    pub action: RangeAction,
}

/// A range `[from, to)` of a sequence replaced by `inserted` units, in the
/// index space the edit saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeEdit {
    pub parent_created_at: TimeTicket,
    pub from: usize,
    pub to: usize,
    pub inserted: usize,
}

impl RangeReverse {
    /// Resolves the range against the current `root` and builds the
    /// operation to replay, stamped from `tickets`. `None` when the sequence
    /// is gone.
    pub fn to_operation(
        &self,
        root: &CrdtRoot,
        tickets: &mut TicketFactory,
    ) -> Result<Option<Operation>, DocError> {
        let parent_created_at = self.parent_created_at;
        let target = match root.find(&parent_created_at) {
            Some(element) if !element.is_removed() => element,
            _ => {
                tracing::warn!(target = %parent_created_at, "history range targets a missing sequence, skipped");
                return Ok(None);
            }
        };
        let op = match &self.action {
            RangeAction::TextEdit { .. } | RangeAction::TextStyle { .. } => {
                let text = target
                    .as_text()
                    .ok_or_else(|| DocError::type_mismatch(parent_created_at, "text"))?;
                let (from, to) = self.clamped(text.len());
                let (from, to) = text.index_range_to_pos_range(from, to)?;
                let executed_at = tickets.issue();
                match &self.action {
                    RangeAction::TextEdit { content, attributes } => Operation::Edit(EditOperation {
                        parent_created_at,
                        from,
                        to,
                        content: content.clone(),
                        attributes: attributes.clone(),
                        latest_created_at_by_actor: None,
                        executed_at,
                    }),
                    RangeAction::TextStyle {
                        attributes,
                        attributes_to_remove,
                    } => Operation::Style(StyleOperation {
                        parent_created_at,
                        from,
                        to,
                        attributes: attributes.clone(),
                        attributes_to_remove: attributes_to_remove.clone(),
                        latest_created_at_by_actor: None,
                        executed_at,
                    }),
                    _ => return Err(DocError::invariant("text range with a tree action")),
                }
            }
            RangeAction::TreeEdit { .. }
            | RangeAction::SetAttribute { .. }
            | RangeAction::RemoveAttribute { .. } => {
                let tree = target
                    .as_tree()
                    .ok_or_else(|| DocError::type_mismatch(parent_created_at, "tree"))?;
                let (from, to) = self.clamped(tree.len());
                let (from, to) = (tree.find_pos(from)?, tree.find_pos(to)?);
                match &self.action {
                    RangeAction::TreeEdit { contents } => {
                        let contents = contents.iter().map(|c| c.restamped(tickets)).collect();
                        Operation::TreeEdit(TreeEditOperation {
                            parent_created_at,
                            from,
                            to,
                            contents,
                            split_level: 0,
                            latest_created_at_by_actor: None,
                            executed_at: tickets.issue(),
                        })
                    }
                    RangeAction::SetAttribute { attributes } => {
                        Operation::SetAttribute(SetAttributeOperation {
                            parent_created_at,
                            from,
                            to,
                            attributes: attributes.clone(),
                            latest_created_at_by_actor: None,
                            executed_at: tickets.issue(),
                        })
                    }
                    RangeAction::RemoveAttribute { keys } => {
                        Operation::RemoveAttribute(RemoveAttributeOperation {
                            parent_created_at,
                            from,
                            to,
                            keys: keys.clone(),
                            latest_created_at_by_actor: None,
                            executed_at: tickets.issue(),
                        })
                    }
                    _ => return Err(DocError::invariant("tree range with a text action")),
                }
            }
        };
        Ok(Some(op))
    }

    fn clamped(&self, len: usize) -> (usize, usize) {
        let to = self.to.min(len);
        (self.from.min(to), to)
    }

    /// Shifts the range over a remote `edit` of the same sequence. Content
    /// inserted at the start of the range lands before it; a range that
    /// loses its interior collapses onto the edit.
    pub fn reconcile(&mut self, edit: &RangeEdit) {
        if edit.parent_created_at != self.parent_created_at {
            return;
        }
        let removed = edit.to - edit.from;
        let shifted = |p: usize| p - removed + edit.inserted;
        self.from = if self.from < edit.from {
            self.from
        } else if self.from >= edit.to {
            shifted(self.from)
        } else {
            edit.from + edit.inserted
        };
        self.to = if self.to <= edit.from {
            self.to
        } else if self.to >= edit.to {
            shifted(self.to)
        } else {
            edit.from
        };
        self.to = self.to.max(self.from);
    }

    pub fn reconcile_created_at(&mut self, prev: &TimeTicket, next: &TimeTicket) {
        if self.parent_created_at == *prev {
            self.parent_created_at = *next;
        }
    }
}
