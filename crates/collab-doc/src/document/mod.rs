//! The document facade.
//!
//! A [`Document`] owns one replica: its root, its clock, the presences it
//! has seen and the local undo/redo history. Local edits go through
//! [`Document::update`]; changes from other replicas through
//! [`Document::apply_change`]. All mutation takes `&mut self`, so a document
//! has exactly one writer and garbage collection can never interleave with
//! an execution.

mod history;
mod options;
mod schema;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use self::history::{History, HistoryGroup};
pub use self::options::{DocumentOptions, DEFAULT_MAX_UNDO_DEPTH};
pub use self::schema::{Schema, SchemaRule, ValueType};
use crate::change::context::ContextOutput;
use crate::change::{Change, ChangeContext, ChangeId, Presence, PresenceChange};
use crate::clock::{ActorId, TimeTicket};
use crate::crdt::{CrdtElement, CrdtRoot};
use crate::error::DocError;
use crate::operation::{OpInfo, OpSource};

/// Everything needed to rebuild a replica elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub change_id: ChangeId,
    pub root: CrdtElement,
    #[serde(default)]
    pub presences: BTreeMap<ActorId, Presence>,
}

#[derive(Debug)]
pub struct Document {
    key: String,
    change_id: ChangeId,
    root: CrdtRoot,
    presences: BTreeMap<ActorId, Presence>,
    history: History,
    options: DocumentOptions,
    local_changes: Vec<Change>,
}

impl Document {
    /// Empty document with a random actor.
    pub fn new(key: impl Into<String>) -> Self {
        Self::with_options(key, DocumentOptions::default())
    }

    pub fn with_options(key: impl Into<String>, options: DocumentOptions) -> Self {
        Self {
            key: key.into(),
            change_id: ChangeId::INITIAL.set_actor(ActorId::random()),
            root: CrdtRoot::new(),
            presences: BTreeMap::new(),
            history: History::new(options.max_undo_depth),
            options,
            local_changes: Vec::new(),
        }
    }

    pub fn from_snapshot(
        key: impl Into<String>,
        snapshot: DocumentSnapshot,
        options: DocumentOptions,
    ) -> Result<Self, DocError> {
        let mut doc = Self::with_options(key, options);
        doc.root = CrdtRoot::from_element(snapshot.root)?;
        doc.change_id = snapshot.change_id;
        doc.presences = snapshot.presences;
        Ok(doc)
    }

    pub fn snapshot(&self) -> DocumentSnapshot {
        DocumentSnapshot {
            change_id: self.change_id,
            root: self.root.root().clone(),
            presences: self.presences.clone(),
        }
    }

    pub fn set_actor(&mut self, actor: ActorId) {
        if let Some(presence) = self.presences.remove(&self.change_id.actor) {
            self.presences.insert(actor, presence);
        }
        self.change_id = self.change_id.set_actor(actor);
    }

    // ── reads ────────────────────────────────────────────────────────────

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn actor(&self) -> ActorId {
        self.change_id.actor
    }

    pub fn change_id(&self) -> &ChangeId {
        &self.change_id
    }

    pub fn options(&self) -> &DocumentOptions {
        &self.options
    }

    pub fn root(&self) -> &CrdtRoot {
        &self.root
    }

    pub fn to_json(&self) -> String {
        self.root.to_json()
    }

    pub fn to_sorted_json(&self) -> String {
        self.root.to_sorted_json()
    }

    pub fn presences(&self) -> &BTreeMap<ActorId, Presence> {
        &self.presences
    }

    pub fn presence(&self, actor: &ActorId) -> Option<&Presence> {
        self.presences.get(actor)
    }

    pub fn my_presence(&self) -> Option<&Presence> {
        self.presences.get(&self.change_id.actor)
    }

    pub fn local_changes(&self) -> &[Change] {
        &self.local_changes
    }

    pub fn has_local_changes(&self) -> bool {
        !self.local_changes.is_empty()
    }

    /// Hands the local changes to the caller, e.g. to send them.
    pub fn take_local_changes(&mut self) -> Vec<Change> {
        std::mem::take(&mut self.local_changes)
    }

    // ── local edits ──────────────────────────────────────────────────────

    /// Runs `f` as one local change. If `f` or the schema check fails, every
    /// effect is undone and the error returned; the clock still moves past
    /// the tickets the attempt spent.
    pub fn update<F>(&mut self, message: Option<&str>, f: F) -> Result<Vec<OpInfo>, DocError>
    where
        F: FnOnce(&mut ChangeContext<'_>) -> Result<(), DocError>,
    {
        let id = self.change_id.next();
        let presence = self.presences.get(&id.actor).cloned();
        let mut ctx = ChangeContext::new(id, &mut self.root, presence, OpSource::Local);
        if let Some(message) = message {
            ctx.set_message(message);
        }
        let checked = f(&mut ctx).and_then(|()| match &self.options.schema {
            Some(schema) => schema.validate(ctx.root()),
            None => Ok(()),
        });
        if let Err(err) = checked {
            tracing::debug!(error = %err, lamport = id.lamport, "update rejected");
            ctx.rollback();
            self.change_id = self.change_id.sync_lamport(id.lamport);
            return Err(err);
        }
        let Some(out) = ctx.finish() else {
            return Ok(Vec::new());
        };
        let (op_infos, reverse) = self.commit(out);
        self.history.push_undo(reverse);
        Ok(op_infos)
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn undo(&mut self) -> Result<Vec<OpInfo>, DocError> {
        let group = self
            .history
            .pop_undo()
            .ok_or_else(|| DocError::Refused("nothing to undo".into()))?;
        let Some(out) = self.replay(group)? else {
            return Ok(Vec::new());
        };
        let (op_infos, reverse) = self.commit(out);
        self.history.push_redo(reverse);
        Ok(op_infos)
    }

    pub fn redo(&mut self) -> Result<Vec<OpInfo>, DocError> {
        let group = self
            .history
            .pop_redo()
            .ok_or_else(|| DocError::Refused("nothing to redo".into()))?;
        let Some(out) = self.replay(group)? else {
            return Ok(Vec::new());
        };
        let (op_infos, reverse) = self.commit(out);
        self.history.restore_undo(reverse);
        Ok(op_infos)
    }

    fn replay(&mut self, group: HistoryGroup) -> Result<Option<ContextOutput>, DocError> {
        let id = self.change_id.next();
        let presence = self.presences.get(&id.actor).cloned();
        let mut ctx = ChangeContext::new(id, &mut self.root, presence, OpSource::UndoRedo);
        if let Err(err) = ctx.replay(group) {
            tracing::warn!(error = %err, lamport = id.lamport, "history replay failed");
            ctx.rollback();
            self.change_id = self.change_id.sync_lamport(id.lamport);
            return Err(err);
        }
        Ok(ctx.finish())
    }

    /// Records a finished local change and returns its infos and reverse.
    fn commit(&mut self, out: ContextOutput) -> (Vec<OpInfo>, HistoryGroup) {
        let ContextOutput {
            change,
            reverse,
            op_infos,
            remap,
        } = out;
        for (prev, next) in &remap {
            self.history.reconcile_created_at(prev, next);
        }
        match &change.presence_change {
            Some(PresenceChange::Put(presence)) => {
                self.presences.insert(change.id.actor, presence.clone());
            }
            Some(PresenceChange::Clear) => {
                self.presences.remove(&change.id.actor);
            }
            None => {}
        }
        tracing::debug!(
            lamport = change.id.lamport,
            client_seq = change.id.client_seq,
            ops = change.operations.len(),
            "local change"
        );
        self.change_id = change.id;
        self.local_changes.push(change);
        (op_infos, reverse)
    }

    // ── remote changes ───────────────────────────────────────────────────

    /// Executes a change from another replica. Changes by this document's
    /// own actor were already applied and are skipped.
    pub fn apply_change(&mut self, change: &Change) -> Result<Vec<OpInfo>, DocError> {
        if change.id.actor == self.change_id.actor {
            tracing::debug!(lamport = change.id.lamport, "skipping own change");
            return Ok(Vec::new());
        }
        let outcome = change.execute(&mut self.root, &mut self.presences, OpSource::Remote)?;
        for edit in &outcome.range_edits {
            self.history.reconcile_range(edit);
        }
        self.change_id = self.change_id.sync_lamport(change.id.lamport);
        Ok(outcome.op_infos)
    }

    pub fn apply_changes(&mut self, changes: &[Change]) -> Result<Vec<OpInfo>, DocError> {
        let mut op_infos = Vec::new();
        for change in changes {
            op_infos.extend(self.apply_change(change)?);
        }
        Ok(op_infos)
    }

    // ── garbage collection ───────────────────────────────────────────────

    /// Purges everything removed at or before `safe`, the minimum ticket
    /// every replica is known to have seen. Returns the purge count.
    pub fn garbage_collect(&mut self, safe: &TimeTicket) -> usize {
        if self.options.disable_gc {
            return 0;
        }
        self.root.garbage_collect(safe)
    }

    pub fn garbage_len(&self) -> usize {
        self.root.garbage_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(actor: u8) -> Document {
        let mut doc = Document::new("test");
        doc.set_actor(ActorId::new([actor; 12]));
        doc
    }

    #[test]
    fn update_records_a_local_change() {
        let mut d = doc(1);
        let infos = d
            .update(Some("init"), |ctx| {
                ctx.set_field(TimeTicket::INITIAL, "k", json!("v"))?;
                Ok(())
            })
            .unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(d.to_json(), r#"{"k":"v"}"#);
        let changes = d.take_local_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].message.as_deref(), Some("init"));
        assert_eq!((changes[0].id.client_seq, changes[0].id.lamport), (1, 1));
        assert!(!d.has_local_changes());
    }

    #[test]
    fn failed_update_leaves_no_trace_but_advances_lamport() {
        let mut d = doc(1);
        let err = d
            .update(None, |ctx| {
                ctx.set_field(TimeTicket::INITIAL, "k", json!(1))?;
                Err(DocError::InvalidArgument("abort".into()))
            })
            .unwrap_err();
        assert_eq!(err, DocError::InvalidArgument("abort".into()));
        assert_eq!(d.to_json(), "{}");
        assert!(!d.has_local_changes());
        assert!(!d.can_undo());
        assert_eq!((d.change_id().client_seq, d.change_id().lamport), (0, 1));
    }

    #[test]
    fn empty_update_produces_no_change() {
        let mut d = doc(1);
        d.update(None, |_| Ok(())).unwrap();
        assert!(!d.has_local_changes());
        assert_eq!(d.change_id().lamport, 0);
    }

    #[test]
    fn own_changes_are_skipped_and_others_sync_the_clock() {
        let mut a = doc(1);
        let mut b = doc(2);
        for _ in 0..3 {
            a.update(None, |ctx| ctx.set_field(TimeTicket::INITIAL, "n", json!(1)).map(|_| ()))
                .unwrap();
        }
        let changes = a.take_local_changes();
        assert!(a.apply_changes(&changes).unwrap().is_empty());
        b.apply_changes(&changes).unwrap();
        assert_eq!(b.change_id().lamport, 3);
        assert_eq!(b.to_sorted_json(), a.to_sorted_json());
    }

    #[test]
    fn undo_on_empty_history_is_refused() {
        let mut d = doc(1);
        assert!(matches!(d.undo(), Err(DocError::Refused(_))));
        assert!(matches!(d.redo(), Err(DocError::Refused(_))));
    }

    #[test]
    fn disabled_gc_keeps_garbage() {
        let opts = DocumentOptions {
            disable_gc: true,
            ..DocumentOptions::default()
        };
        let mut d = Document::with_options("test", opts);
        d.update(None, |ctx| ctx.set_field(TimeTicket::INITIAL, "k", json!(1)).map(|_| ()))
            .unwrap();
        d.update(None, |ctx| ctx.remove_field(TimeTicket::INITIAL, "k").map(|_| ()))
            .unwrap();
        assert_eq!(d.garbage_len(), 1);
        assert_eq!(d.garbage_collect(&TimeTicket::MAX), 0);
        assert_eq!(d.garbage_len(), 1);
    }

    #[test]
    fn snapshot_round_trip() {
        let mut d = doc(1);
        d.update(None, |ctx| {
            let list = ctx.set_field(TimeTicket::INITIAL, "list", json!([1, 2, 3]))?;
            ctx.delete_by_index(list, 1)?;
            ctx.set_presence("name", json!("a"));
            Ok(())
        })
        .unwrap();
        let snapshot = serde_json::to_value(d.snapshot()).unwrap();
        let snapshot: DocumentSnapshot = serde_json::from_value(snapshot).unwrap();
        let restored = Document::from_snapshot("copy", snapshot, DocumentOptions::default()).unwrap();
        assert_eq!(restored.to_sorted_json(), d.to_sorted_json());
        assert_eq!(restored.garbage_len(), d.garbage_len());
        assert_eq!(restored.my_presence(), d.my_presence());
    }
}
