//! Changes: the unit of replication.
//!
//! A [`Change`] bundles the operations one `update` produced, an optional
//! presence delta and a message. Local changes are built by a
//! [`ChangeContext`]; remote ones are executed here with
//! [`OpSource::Remote`].

mod change_id;
pub mod context;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use self::change_id::ChangeId;
pub use self::context::{ChangeContext, ElementInit};
use crate::clock::{ActorId, TimeTicket};
use crate::crdt::CrdtRoot;
use crate::error::DocError;
use crate::operation::{OpInfo, OpSource, Operation, RangeEdit, RangeReverse, Reverse};

/// Ephemeral per-actor state carried next to the document.
pub type Presence = serde_json::Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "presence", rename_all = "snake_case")]
pub enum PresenceChange {
    /// Replaces the actor's presence.
    Put(Presence),
    /// Drops the actor's presence.
    Clear,
}

/// One entry of an undo or redo group.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryEntry {
    Op(Operation),
    /// A text or tree range, resolved to positions on replay.
    Range(RangeReverse),
    /// Previous values of the presence keys a change wrote.
    Presence(Presence),
}

impl From<Reverse> for HistoryEntry {
    fn from(reverse: Reverse) -> Self {
        match reverse {
            Reverse::Op(op) => HistoryEntry::Op(op),
            Reverse::Range(range) => HistoryEntry::Range(range),
        }
    }
}

impl HistoryEntry {
    pub fn reconcile_created_at(&mut self, prev: &TimeTicket, next: &TimeTicket) {
        match self {
            HistoryEntry::Op(op) => op.reconcile_created_at(prev, next),
            HistoryEntry::Range(range) => range.reconcile_created_at(prev, next),
            HistoryEntry::Presence(_) => {}
        }
    }

    /// Shifts a range entry over a remote edit of its sequence.
    pub fn reconcile_range(&mut self, edit: &RangeEdit) {
        if let HistoryEntry::Range(range) = self {
            range.reconcile(edit);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChangeOutcome {
    pub op_infos: Vec<OpInfo>,
    /// Reverses, last applied first.
    pub reverses: Vec<Reverse>,
    /// Sequence ranges the change replaced, in the order applied.
    pub range_edits: Vec<RangeEdit>,
}

// ── Change ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub id: ChangeId,
    pub operations: Vec<Operation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_change: Option<PresenceChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Change {
    pub fn new(id: ChangeId, operations: Vec<Operation>) -> Self {
        Self {
            id,
            operations,
            presence_change: None,
            message: None,
        }
    }

    pub fn actor(&self) -> ActorId {
        self.id.actor
    }

    pub fn has_operations(&self) -> bool {
        !self.operations.is_empty()
    }

    /// Runs every operation in order, then applies the presence delta for
    /// the change's actor.
    pub fn execute(
        &self,
        root: &mut CrdtRoot,
        presences: &mut BTreeMap<ActorId, Presence>,
        source: OpSource,
    ) -> Result<ChangeOutcome, DocError> {
        let mut outcome = ChangeOutcome::default();
        for op in &self.operations {
            let Some(result) = op.execute(root, source)? else {
                continue;
            };
            outcome.op_infos.extend(result.op_infos);
            outcome.reverses.extend(result.reverse);
            outcome.range_edits.extend(result.range_edits);
        }
        outcome.reverses.reverse();

        match &self.presence_change {
            Some(PresenceChange::Put(presence)) => {
                presences.insert(self.id.actor, presence.clone());
            }
            Some(PresenceChange::Clear) => {
                presences.remove(&self.id.actor);
            }
            None => {}
        }
        tracing::debug!(
            actor = %self.id.actor,
            lamport = self.id.lamport,
            ops = self.operations.len(),
            ?source,
            "change executed"
        );
        Ok(outcome)
    }

    pub fn to_struct(&self) -> Result<Value, DocError> {
        serde_json::to_value(self).map_err(|e| DocError::InvalidArgument(e.to_string()))
    }

    pub fn from_struct(value: Value) -> Result<Change, DocError> {
        serde_json::from_value(value).map_err(|e| DocError::InvalidArgument(e.to_string()))
    }
}
