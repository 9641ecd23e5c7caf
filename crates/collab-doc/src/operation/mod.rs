//! Operations: the mutation commands carried by a change.
//!
//! Every operation names the element it targets by creation ticket and is
//! stamped with the ticket it executes at. Executing an operation mutates the
//! [`CrdtRoot`], registers whatever it created or removed, and yields the
//! observable [`OpInfo`]s plus a [`Reverse`]. Element operations reverse to
//! another operation; text and tree edits reverse to an index range that is
//! resolved when replayed. Local, remote and undo/redo execution share this
//! one path; [`OpSource`] only decides how unresolvable targets are treated.

pub mod info;
mod object;
mod reverse;
mod text;
mod tree;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use self::info::{OpInfo, TextEditValue};
pub use self::object::{
    AddOperation, IncreaseOperation, MoveOperation, RemoveOperation, SetOperation,
};
pub use self::reverse::{RangeAction, RangeEdit, RangeReverse, Reverse};
pub use self::text::{EditOperation, StyleOperation};
pub use self::tree::{RemoveAttributeOperation, SetAttributeOperation, TreeEditOperation};
use crate::clock::{ActorId, TicketFactory, TimeTicket};
use crate::crdt::{CrdtElement, CrdtRoot};
use crate::error::DocError;

/// Per-actor creation ticket of the newest node an editor had seen.
pub type CreatedAtByActor = BTreeMap<ActorId, TimeTicket>;

/// Where an operation comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpSource {
    Local,
    Remote,
    /// Replay of a history entry. Targets that were removed or purged in the
    /// meantime are skipped instead of failing.
    UndoRedo,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub op_infos: Vec<OpInfo>,
    pub reverse: Option<Reverse>,
    /// Ranges of text or tree this execution replaced, in the order applied.
    pub range_edits: Vec<RangeEdit>,
    /// Set by sequence edits; stored on the operation when it executes
    /// locally so remote replicas resolve it against the same knowledge.
    pub created_at_by_actor: Option<CreatedAtByActor>,
}

// ── Operation ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    Set(SetOperation),
    Remove(RemoveOperation),
    Add(AddOperation),
    Move(MoveOperation),
    Edit(EditOperation),
    Style(StyleOperation),
    TreeEdit(TreeEditOperation),
    SetAttribute(SetAttributeOperation),
    RemoveAttribute(RemoveAttributeOperation),
    Increase(IncreaseOperation),
}

macro_rules! each_op {
    ($self:expr, $op:ident => $body:expr) => {
        match $self {
            Operation::Set($op) => $body,
            Operation::Remove($op) => $body,
            Operation::Add($op) => $body,
            Operation::Move($op) => $body,
            Operation::Edit($op) => $body,
            Operation::Style($op) => $body,
            Operation::TreeEdit($op) => $body,
            Operation::SetAttribute($op) => $body,
            Operation::RemoveAttribute($op) => $body,
            Operation::Increase($op) => $body,
        }
    };
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Set(_) => "set",
            Operation::Remove(_) => "remove",
            Operation::Add(_) => "add",
            Operation::Move(_) => "move",
            Operation::Edit(_) => "edit",
            Operation::Style(_) => "style",
            Operation::TreeEdit(_) => "tree_edit",
            Operation::SetAttribute(_) => "set_attribute",
            Operation::RemoveAttribute(_) => "remove_attribute",
            Operation::Increase(_) => "increase",
        }
    }

    pub fn parent_created_at(&self) -> TimeTicket {
        each_op!(self, op => op.parent_created_at)
    }

    pub fn executed_at(&self) -> TimeTicket {
        each_op!(self, op => op.executed_at)
    }

    /// Executes against `root`. `Ok(None)` means the operation was skipped,
    /// which only happens for [`OpSource::UndoRedo`].
    pub fn execute(
        &self,
        root: &mut CrdtRoot,
        source: OpSource,
    ) -> Result<Option<ExecutionResult>, DocError> {
        tracing::trace!(op = self.name(), executed_at = %self.executed_at(), ?source, "execute");
        let result = match self {
            Operation::Set(op) => op.execute(root, source),
            Operation::Remove(op) => op.execute(root, source),
            Operation::Add(op) => op.execute(root, source),
            Operation::Move(op) => op.execute(root, source),
            Operation::Edit(op) => op.execute(root, source),
            Operation::Style(op) => op.execute(root, source),
            Operation::TreeEdit(op) => op.execute(root, source),
            Operation::SetAttribute(op) => op.execute(root, source),
            Operation::RemoveAttribute(op) => op.execute(root, source),
            Operation::Increase(op) => op.execute(root, source),
        };
        match result {
            Err(DocError::PositionNotFound(pos)) if source == OpSource::UndoRedo => {
                tracing::warn!(op = self.name(), %pos, "history entry no longer resolves, skipped");
                Ok(None)
            }
            other => other,
        }
    }

    /// Records what the editor had seen; see [`ExecutionResult`].
    pub fn set_created_at_by_actor(&mut self, map: CreatedAtByActor) {
        match self {
            Operation::Edit(op) => op.latest_created_at_by_actor = Some(map),
            Operation::Style(op) => op.latest_created_at_by_actor = Some(map),
            Operation::TreeEdit(op) => op.latest_created_at_by_actor = Some(map),
            Operation::SetAttribute(op) => op.latest_created_at_by_actor = Some(map),
            Operation::RemoveAttribute(op) => op.latest_created_at_by_actor = Some(map),
            _ => {}
        }
    }

    /// Copy of this history entry for replay: a fresh execution ticket, fresh
    /// creation tickets for carried values, and no remote knowledge bound.
    /// Every `(old, new)` creation ticket pair is appended to `remap`.
    pub fn restamped(
        &self,
        tickets: &mut TicketFactory,
        remap: &mut Vec<(TimeTicket, TimeTicket)>,
    ) -> Result<Operation, DocError> {
        let mut op = self.clone();
        match &mut op {
            Operation::Set(set) => {
                set.executed_at = tickets.issue();
                set.value = set.value.restamp(set.executed_at, tickets, remap)?;
            }
            Operation::Add(add) => {
                add.executed_at = tickets.issue();
                add.value = add.value.restamp(add.executed_at, tickets, remap)?;
            }
            Operation::TreeEdit(edit) => {
                edit.contents = edit.contents.iter().map(|c| c.restamped(tickets)).collect();
                edit.executed_at = tickets.issue();
                edit.latest_created_at_by_actor = None;
                tickets.skip(edit.split_level);
            }
            other => {
                each_op!(other, o => o.executed_at = tickets.issue());
                other.clear_created_at_by_actor();
            }
        }
        Ok(op)
    }

    fn clear_created_at_by_actor(&mut self) {
        match self {
            Operation::Edit(op) => op.latest_created_at_by_actor = None,
            Operation::Style(op) => op.latest_created_at_by_actor = None,
            Operation::TreeEdit(op) => op.latest_created_at_by_actor = None,
            Operation::SetAttribute(op) => op.latest_created_at_by_actor = None,
            Operation::RemoveAttribute(op) => op.latest_created_at_by_actor = None,
            _ => {}
        }
    }

    /// Points references to the element created at `prev` to `next`, after
    /// that element was re-created by an undo or redo.
    pub fn reconcile_created_at(&mut self, prev: &TimeTicket, next: &TimeTicket) {
        let swap = |t: &mut TimeTicket| {
            if t == prev {
                *t = *next;
            }
        };
        match self {
            Operation::Remove(op) => swap(&mut op.created_at),
            Operation::Add(op) => swap(&mut op.prev_created_at),
            Operation::Move(op) => {
                swap(&mut op.prev_created_at);
                swap(&mut op.created_at);
            }
            _ => {}
        }
        each_op!(self, op => swap(&mut op.parent_created_at));
    }
}

// ── helpers shared by the operation kinds ─────────────────────────────────

/// Resolves the target of an operation. Under undo/redo a missing or removed
/// target yields `None`.
pub(crate) fn resolve<'r>(
    root: &'r mut CrdtRoot,
    created_at: &TimeTicket,
    source: OpSource,
) -> Result<Option<&'r mut CrdtElement>, DocError> {
    match root.find_mut(created_at) {
        Some(element) if source == OpSource::UndoRedo && element.is_removed() => {
            tracing::warn!(target = %created_at, "history entry targets a removed element, skipped");
            Ok(None)
        }
        Some(element) => Ok(Some(element)),
        None if source == OpSource::UndoRedo => {
            tracing::warn!(target = %created_at, "history entry targets a purged element, skipped");
            Ok(None)
        }
        None => Err(DocError::not_found(*created_at)),
    }
}
