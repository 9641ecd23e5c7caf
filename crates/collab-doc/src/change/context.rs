//! The mutation context handed to a document update.
//!
//! Every typed method mints tickets from the change's own
//! [`TicketFactory`], builds the operation, executes it right away and keeps
//! the operation, its infos and its reverse. Nothing here touches shared
//! clock state, so a context can be unwound or dropped without side effects
//! beyond the root it borrows.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde_json::Value;

use super::{Change, ChangeId, HistoryEntry, Presence, PresenceChange};
use crate::clock::{TicketFactory, TimeTicket};
use crate::crdt::rga_tree_split::SplitPos;
use crate::crdt::tree::{TreeNodeSpec, TreePos};
use crate::crdt::{
    CounterValue, CrdtArray, CrdtElement, CrdtObject, CrdtRoot, CrdtText, CrdtTree,
    PrimitiveValue,
};
use crate::error::DocError;
use crate::operation::{
    AddOperation, EditOperation, IncreaseOperation, MoveOperation, OpInfo, OpSource, Operation,
    RemoveAttributeOperation, RemoveOperation, SetAttributeOperation, SetOperation,
    StyleOperation, TreeEditOperation,
};

// ── ElementInit ───────────────────────────────────────────────────────────

/// A value to store, before tickets are assigned.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementInit {
    /// Scalars become primitives, arrays and objects become containers.
    Json(Value),
    Primitive(PrimitiveValue),
    Counter(CounterValue),
    /// A text element with initial content.
    Text(String),
    /// A tree element rooted at an element node.
    Tree(TreeNodeSpec),
    Object(IndexMap<String, ElementInit>),
    Array(Vec<ElementInit>),
}

impl From<Value> for ElementInit {
    fn from(value: Value) -> Self {
        ElementInit::Json(value)
    }
}

impl From<PrimitiveValue> for ElementInit {
    fn from(value: PrimitiveValue) -> Self {
        ElementInit::Primitive(value)
    }
}

impl From<CounterValue> for ElementInit {
    fn from(value: CounterValue) -> Self {
        ElementInit::Counter(value)
    }
}

impl ElementInit {
    pub fn text(content: impl Into<String>) -> Self {
        ElementInit::Text(content.into())
    }

    /// Checks keys before any ticket is spent.
    fn validate(&self) -> Result<(), DocError> {
        match self {
            ElementInit::Json(value) => validate_json(value),
            ElementInit::Object(members) => members.iter().try_for_each(|(key, value)| {
                validate_key(key)?;
                value.validate()
            }),
            ElementInit::Array(items) => items.iter().try_for_each(ElementInit::validate),
            ElementInit::Tree(TreeNodeSpec::Text { .. }) => Err(DocError::InvalidArgument(
                "tree root must be an element".into(),
            )),
            _ => Ok(()),
        }
    }

    /// Builds the element stamped `created_at`; nested values take later
    /// tickets from `tickets`.
    fn build(&self, created_at: TimeTicket, tickets: &mut TicketFactory) -> Result<CrdtElement, DocError> {
        Ok(match self {
            ElementInit::Json(value) => build_json(value, created_at, tickets)?,
            ElementInit::Primitive(p) => CrdtElement::primitive(p.clone(), created_at),
            ElementInit::Counter(c) => CrdtElement::counter(*c, created_at),
            ElementInit::Text(content) => {
                let mut text = CrdtText::new();
                if !content.is_empty() {
                    let (from, to) = text.index_range_to_pos_range(0, 0)?;
                    text.edit((&from, &to), content, None, tickets.issue(), None)?;
                }
                CrdtElement::text(text, created_at)
            }
            ElementInit::Tree(spec) => {
                let tree = CrdtTree::from_data(&spec.to_data(tickets))?;
                CrdtElement::tree(tree, created_at)
            }
            ElementInit::Object(members) => {
                let mut object = CrdtObject::new();
                for (key, member) in members {
                    let at = tickets.issue();
                    object.set(key, member.build(at, tickets)?, at);
                }
                CrdtElement::object(object, created_at)
            }
            ElementInit::Array(items) => {
                let mut array = CrdtArray::new();
                for item in items {
                    let at = tickets.issue();
                    array.push(item.build(at, tickets)?)?;
                }
                CrdtElement::array(array, created_at)
            }
        })
    }
}

fn validate_json(value: &Value) -> Result<(), DocError> {
    match value {
        Value::Object(map) => map.iter().try_for_each(|(key, member)| {
            validate_key(key)?;
            validate_json(member)
        }),
        Value::Array(items) => items.iter().try_for_each(validate_json),
        _ => Ok(()),
    }
}

fn build_json(value: &Value, created_at: TimeTicket, tickets: &mut TicketFactory) -> Result<CrdtElement, DocError> {
    Ok(match value {
        Value::Object(map) => {
            let mut object = CrdtObject::new();
            for (key, member) in map {
                let at = tickets.issue();
                object.set(key, build_json(member, at, tickets)?, at);
            }
            CrdtElement::object(object, created_at)
        }
        Value::Array(items) => {
            let mut array = CrdtArray::new();
            for item in items {
                let at = tickets.issue();
                array.push(build_json(item, at, tickets)?)?;
            }
            CrdtElement::array(array, created_at)
        }
        scalar => {
            let primitive = PrimitiveValue::from_json_scalar(scalar)
                .ok_or_else(|| DocError::InvalidArgument(format!("unsupported value {scalar}")))?;
            CrdtElement::primitive(primitive, created_at)
        }
    })
}

/// Keys end up in `$`-paths, so the path separators are reserved.
fn validate_key(key: &str) -> Result<(), DocError> {
    if key.contains(['.', '[', ']']) {
        return Err(DocError::InvalidArgument(format!(
            "key {key:?} contains a reserved character"
        )));
    }
    Ok(())
}

fn encode_attributes(attributes: &BTreeMap<String, Value>) -> BTreeMap<String, String> {
    attributes
        .iter()
        .map(|(key, value)| (key.clone(), value.to_string()))
        .collect()
}

/// What a finished context hands back to the document.
#[derive(Debug)]
pub struct ContextOutput {
    pub change: Change,
    /// Reverse entries, last applied first.
    pub reverse: Vec<HistoryEntry>,
    pub op_infos: Vec<OpInfo>,
    /// `(old, new)` creation tickets of values re-created by a replay.
    pub remap: Vec<(TimeTicket, TimeTicket)>,
}

// ── ChangeContext ─────────────────────────────────────────────────────────

pub struct ChangeContext<'a> {
    id: ChangeId,
    root: &'a mut CrdtRoot,
    tickets: TicketFactory,
    source: OpSource,
    operations: Vec<Operation>,
    /// Reverse entries in emission order.
    reverse: Vec<HistoryEntry>,
    op_infos: Vec<OpInfo>,
    presence: Option<Presence>,
    presence_change: Option<PresenceChange>,
    /// Values the presence keys had before this change wrote them.
    presence_before: Presence,
    message: Option<String>,
    /// Root as it was before the first operation of a local or history
    /// context.
    snapshot: Option<CrdtRoot>,
    remap: Vec<(TimeTicket, TimeTicket)>,
}

impl<'a> ChangeContext<'a> {
    pub fn new(
        id: ChangeId,
        root: &'a mut CrdtRoot,
        presence: Option<Presence>,
        source: OpSource,
    ) -> Self {
        Self {
            tickets: id.ticket_factory(),
            id,
            root,
            source,
            operations: Vec::new(),
            reverse: Vec::new(),
            op_infos: Vec::new(),
            presence,
            presence_change: None,
            presence_before: Presence::new(),
            message: None,
            snapshot: None,
            remap: Vec::new(),
        }
    }

    pub fn id(&self) -> &ChangeId {
        &self.id
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
    }

    pub fn has_changes(&self) -> bool {
        !self.operations.is_empty() || self.presence_change.is_some()
    }

    /// Lamport value of the tickets this context issues.
    pub fn lamport(&self) -> u64 {
        self.tickets.lamport()
    }

    // ── reads ────────────────────────────────────────────────────────────

    pub fn root(&self) -> &CrdtRoot {
        self.root
    }

    pub fn find(&self, created_at: &TimeTicket) -> Option<&CrdtElement> {
        self.root.find(created_at)
    }

    pub fn find_by_path(&self, path: &str) -> Result<Option<&CrdtElement>, DocError> {
        self.root.find_by_path(path)
    }

    /// Creation ticket of the live element at `path`.
    pub fn created_at_of(&self, path: &str) -> Result<TimeTicket, DocError> {
        self.root
            .find_by_path(path)?
            .map(CrdtElement::created_at)
            .ok_or_else(|| DocError::InvalidArgument(format!("nothing at {path}")))
    }

    pub fn to_json_value(&self) -> Value {
        self.root.to_json_value()
    }

    pub fn presence(&self) -> Option<&Presence> {
        self.presence.as_ref()
    }

    pub fn op_infos(&self) -> &[OpInfo] {
        &self.op_infos
    }

    // ── objects ──────────────────────────────────────────────────────────

    /// Stores `value` under `key`; returns the new element's ticket.
    pub fn set_field(
        &mut self,
        object: TimeTicket,
        key: &str,
        value: impl Into<ElementInit>,
    ) -> Result<TimeTicket, DocError> {
        validate_key(key)?;
        let value = value.into();
        value.validate()?;
        self.expect_kind(&object, "object")?;
        let executed_at = self.tickets.issue();
        let value = value.build(executed_at, &mut self.tickets)?;
        self.push(Operation::Set(SetOperation {
            parent_created_at: object,
            key: key.to_owned(),
            value,
            executed_at,
        }))?;
        Ok(executed_at)
    }

    /// Removes the live member `key`. Returns `false` when there is none.
    pub fn remove_field(&mut self, object: TimeTicket, key: &str) -> Result<bool, DocError> {
        let created_at = match self.expect_kind(&object, "object")?.as_object().and_then(|o| o.get(key)) {
            Some(member) => member.created_at(),
            None => return Ok(false),
        };
        let executed_at = self.tickets.issue();
        self.push(Operation::Remove(RemoveOperation {
            parent_created_at: object,
            created_at,
            executed_at,
        }))?;
        Ok(true)
    }

    // ── arrays ───────────────────────────────────────────────────────────

    pub fn push_item(&mut self, array: TimeTicket, value: impl Into<ElementInit>) -> Result<TimeTicket, DocError> {
        let prev = self.array(&array)?.last_created_at();
        self.insert_item_after(array, prev, value)
    }

    /// Inserts after `prev`; [`TimeTicket::INITIAL`] inserts at the front.
    pub fn insert_item_after(
        &mut self,
        array: TimeTicket,
        prev: TimeTicket,
        value: impl Into<ElementInit>,
    ) -> Result<TimeTicket, DocError> {
        let value = value.into();
        value.validate()?;
        if prev != TimeTicket::INITIAL && self.array(&array)?.get(&prev).is_none() {
            return Err(DocError::InvalidArgument(format!("{prev} is not an item of {array}")));
        }
        let executed_at = self.tickets.issue();
        let value = value.build(executed_at, &mut self.tickets)?;
        self.push(Operation::Add(AddOperation {
            parent_created_at: array,
            prev_created_at: prev,
            value,
            executed_at,
        }))?;
        Ok(executed_at)
    }

    /// Inserts at visible `index`.
    pub fn insert_item(
        &mut self,
        array: TimeTicket,
        index: usize,
        value: impl Into<ElementInit>,
    ) -> Result<TimeTicket, DocError> {
        let prev = match index {
            0 => {
                self.array(&array)?;
                TimeTicket::INITIAL
            }
            i => self
                .item_at(&array, i - 1)?
                .ok_or_else(|| DocError::InvalidArgument(format!("index {index} out of range")))?,
        };
        self.insert_item_after(array, prev, value)
    }

    pub fn delete_by_id(&mut self, array: TimeTicket, created_at: TimeTicket) -> Result<(), DocError> {
        if self.array(&array)?.get(&created_at).is_none() {
            return Err(DocError::InvalidArgument(format!("{created_at} is not an item of {array}")));
        }
        let executed_at = self.tickets.issue();
        self.push(Operation::Remove(RemoveOperation {
            parent_created_at: array,
            created_at,
            executed_at,
        }))
    }

    /// Removes the item at visible `index`; returns its ticket.
    pub fn delete_by_index(&mut self, array: TimeTicket, index: usize) -> Result<Option<TimeTicket>, DocError> {
        let Some(created_at) = self.item_at(&array, index)? else {
            return Ok(None);
        };
        self.delete_by_id(array, created_at)?;
        Ok(Some(created_at))
    }

    pub fn move_item_after(
        &mut self,
        array: TimeTicket,
        prev: TimeTicket,
        created_at: TimeTicket,
    ) -> Result<(), DocError> {
        let items = self.array(&array)?;
        if items.get(&created_at).is_none()
            || (prev != TimeTicket::INITIAL && items.get(&prev).is_none())
        {
            return Err(DocError::InvalidArgument(format!("cannot move {created_at} after {prev}")));
        }
        let executed_at = self.tickets.issue();
        self.push(Operation::Move(MoveOperation {
            parent_created_at: array,
            prev_created_at: prev,
            created_at,
            executed_at,
        }))
    }

    // ── counters ─────────────────────────────────────────────────────────

    pub fn increase_counter(
        &mut self,
        counter: TimeTicket,
        value: impl Into<PrimitiveValue>,
    ) -> Result<(), DocError> {
        let value = value.into();
        if !value.is_numeric() {
            return Err(DocError::Unimplemented(format!(
                "counter cannot be increased by a {} value",
                value.type_name()
            )));
        }
        self.expect_kind(&counter, "counter")?;
        let executed_at = self.tickets.issue();
        self.push(Operation::Increase(IncreaseOperation {
            parent_created_at: counter,
            value,
            executed_at,
        }))
    }

    // ── text ─────────────────────────────────────────────────────────────

    /// Replaces `[from, to)` with `content`, styled with `attributes`.
    pub fn edit_text(
        &mut self,
        text: TimeTicket,
        from: usize,
        to: usize,
        content: &str,
        attributes: Option<&BTreeMap<String, Value>>,
    ) -> Result<(), DocError> {
        let (from, to) = self.text_range(&text, from, to)?;
        let executed_at = self.tickets.issue();
        self.push(Operation::Edit(EditOperation {
            parent_created_at: text,
            from,
            to,
            content: content.to_owned(),
            attributes: attributes.map(encode_attributes).unwrap_or_default(),
            latest_created_at_by_actor: None,
            executed_at,
        }))
    }

    pub fn style_text(
        &mut self,
        text: TimeTicket,
        from: usize,
        to: usize,
        attributes: &BTreeMap<String, Value>,
    ) -> Result<(), DocError> {
        self.restyle_text(text, from, to, encode_attributes(attributes), Vec::new())
    }

    pub fn remove_text_style(
        &mut self,
        text: TimeTicket,
        from: usize,
        to: usize,
        keys: &[String],
    ) -> Result<(), DocError> {
        self.restyle_text(text, from, to, BTreeMap::new(), keys.to_vec())
    }

    fn restyle_text(
        &mut self,
        text: TimeTicket,
        from: usize,
        to: usize,
        attributes: BTreeMap<String, String>,
        attributes_to_remove: Vec<String>,
    ) -> Result<(), DocError> {
        let (from, to) = self.text_range(&text, from, to)?;
        let executed_at = self.tickets.issue();
        self.push(Operation::Style(StyleOperation {
            parent_created_at: text,
            from,
            to,
            attributes,
            attributes_to_remove,
            latest_created_at_by_actor: None,
            executed_at,
        }))
    }

    fn text_range(
        &self,
        text: &TimeTicket,
        from: usize,
        to: usize,
    ) -> Result<(SplitPos, SplitPos), DocError> {
        let value = self
            .expect_kind(text, "text")?
            .as_text()
            .ok_or_else(|| DocError::type_mismatch(*text, "text"))?;
        if from > to || to > value.len() {
            return Err(DocError::InvalidArgument(format!(
                "text range {from}..{to} is outside 0..{}",
                value.len()
            )));
        }
        value.index_range_to_pos_range(from, to)
    }

    // ── trees ────────────────────────────────────────────────────────────

    /// Replaces `[from, to)` with `contents` after splitting `split_level`
    /// ancestors at `from`.
    pub fn edit_tree(
        &mut self,
        tree: TimeTicket,
        from: usize,
        to: usize,
        contents: &[TreeNodeSpec],
        split_level: u32,
    ) -> Result<(), DocError> {
        let (from, to) = self.tree_range(&tree, from, to)?;
        self.edit_tree_at(tree, from, to, contents, split_level)
    }

    /// [`edit_tree`](Self::edit_tree) addressed by child-index paths.
    pub fn edit_tree_by_path(
        &mut self,
        tree: TimeTicket,
        from_path: &[usize],
        to_path: &[usize],
        contents: &[TreeNodeSpec],
        split_level: u32,
    ) -> Result<(), DocError> {
        let value = self.tree(&tree)?;
        let (from, to) = (value.path_to_index(from_path)?, value.path_to_index(to_path)?);
        self.edit_tree(tree, from, to, contents, split_level)
    }

    fn edit_tree_at(
        &mut self,
        tree: TimeTicket,
        from: TreePos,
        to: TreePos,
        contents: &[TreeNodeSpec],
        split_level: u32,
    ) -> Result<(), DocError> {
        if contents.is_empty() && from == to && split_level == 0 {
            return Ok(());
        }
        let contents = contents
            .iter()
            .map(|spec| spec.to_data(&mut self.tickets))
            .collect();
        let executed_at = self.tickets.issue();
        self.tickets.skip(split_level);
        self.push(Operation::TreeEdit(TreeEditOperation {
            parent_created_at: tree,
            from,
            to,
            contents,
            split_level,
            latest_created_at_by_actor: None,
            executed_at,
        }))
    }

    /// Sets attributes on the elements whose start token lies in
    /// `[from, to)`.
    pub fn style_tree(
        &mut self,
        tree: TimeTicket,
        from: usize,
        to: usize,
        attributes: &BTreeMap<String, Value>,
    ) -> Result<(), DocError> {
        let (from, to) = self.tree_range(&tree, from, to)?;
        let executed_at = self.tickets.issue();
        self.push(Operation::SetAttribute(SetAttributeOperation {
            parent_created_at: tree,
            from,
            to,
            attributes: encode_attributes(attributes),
            latest_created_at_by_actor: None,
            executed_at,
        }))
    }

    pub fn remove_tree_style(
        &mut self,
        tree: TimeTicket,
        from: usize,
        to: usize,
        keys: &[String],
    ) -> Result<(), DocError> {
        let (from, to) = self.tree_range(&tree, from, to)?;
        let executed_at = self.tickets.issue();
        self.push(Operation::RemoveAttribute(RemoveAttributeOperation {
            parent_created_at: tree,
            from,
            to,
            keys: keys.to_vec(),
            latest_created_at_by_actor: None,
            executed_at,
        }))
    }

    fn tree_range(&self, tree: &TimeTicket, from: usize, to: usize) -> Result<(TreePos, TreePos), DocError> {
        let value = self.tree(tree)?;
        if from > to || to > value.len() {
            return Err(DocError::InvalidArgument(format!(
                "tree range {from}..{to} is outside 0..{}",
                value.len()
            )));
        }
        Ok((value.find_pos(from)?, value.find_pos(to)?))
    }

    // ── presence ─────────────────────────────────────────────────────────

    pub fn set_presence(&mut self, key: &str, value: Value) {
        let presence = self.presence.get_or_insert_with(Presence::new);
        if !self.presence_before.contains_key(key) {
            if let Some(previous) = presence.get(key) {
                self.presence_before.insert(key.to_owned(), previous.clone());
            }
        }
        presence.insert(key.to_owned(), value);
        self.presence_change = Some(PresenceChange::Put(presence.clone()));
    }

    pub fn clear_presence(&mut self) {
        self.presence = None;
        self.presence_change = Some(PresenceChange::Clear);
    }

    // ── execution ────────────────────────────────────────────────────────

    fn expect_kind(&self, created_at: &TimeTicket, expected: &'static str) -> Result<&CrdtElement, DocError> {
        let element = self
            .root
            .find(created_at)
            .filter(|e| !e.is_removed())
            .ok_or_else(|| DocError::InvalidArgument(format!("no live element {created_at}")))?;
        if element.type_name() != expected {
            return Err(DocError::InvalidArgument(format!(
                "{created_at} is {}, not {expected}",
                element.type_name()
            )));
        }
        Ok(element)
    }

    fn array(&self, created_at: &TimeTicket) -> Result<&CrdtArray, DocError> {
        self.expect_kind(created_at, "array")?
            .as_array()
            .ok_or_else(|| DocError::type_mismatch(*created_at, "array"))
    }

    /// Ticket of the live item at `index`, looked up through the array's
    /// splay index.
    fn item_at(&mut self, array: &TimeTicket, index: usize) -> Result<Option<TimeTicket>, DocError> {
        self.array(array)?;
        Ok(self
            .root
            .find_mut(array)
            .and_then(CrdtElement::as_array_mut)
            .and_then(|items| items.get_by_index(index))
            .map(CrdtElement::created_at))
    }

    fn tree(&self, created_at: &TimeTicket) -> Result<&CrdtTree, DocError> {
        self.expect_kind(created_at, "tree")?
            .as_tree()
            .ok_or_else(|| DocError::type_mismatch(*created_at, "tree"))
    }

    /// Executes `op` and records it with its infos and reverse.
    fn push(&mut self, mut op: Operation) -> Result<(), DocError> {
        if self.source != OpSource::Remote && self.snapshot.is_none() {
            self.snapshot = Some(self.root.clone());
        }
        let Some(result) = op.execute(self.root, self.source)? else {
            return Ok(());
        };
        if let Some(map) = result.created_at_by_actor {
            op.set_created_at_by_actor(map);
        }
        self.op_infos.extend(result.op_infos);
        self.reverse.extend(result.reverse.map(HistoryEntry::from));
        self.operations.push(op);
        Ok(())
    }

    /// Replays history `entries` in order with fresh tickets. References to
    /// values re-created by an earlier entry are remapped before the later
    /// entries run.
    pub fn replay(&mut self, mut entries: Vec<HistoryEntry>) -> Result<(), DocError> {
        for i in 0..entries.len() {
            let seen = self.remap.len();
            match &entries[i] {
                HistoryEntry::Op(op) => {
                    let op = op.restamped(&mut self.tickets, &mut self.remap)?;
                    self.push(op)?;
                }
                HistoryEntry::Range(range) => {
                    if let Some(op) = range.to_operation(self.root, &mut self.tickets)? {
                        self.push(op)?;
                    }
                }
                HistoryEntry::Presence(previous) => {
                    for (key, value) in previous.clone() {
                        self.set_presence(&key, value);
                    }
                }
            }
            for (prev, next) in self.remap[seen..].to_vec() {
                for later in &mut entries[i + 1..] {
                    later.reconcile_created_at(&prev, &next);
                }
            }
        }
        Ok(())
    }

    /// Puts the root back exactly as it was before the first operation, with
    /// every element keeping its ticket. The tickets this context issued are
    /// still spent from its lamport.
    pub fn rollback(mut self) {
        tracing::debug!(
            lamport = self.id.lamport,
            discarded = self.operations.len(),
            "rolling back change"
        );
        if let Some(snapshot) = self.snapshot.take() {
            *self.root = snapshot;
        }
    }

    /// The change and its reverse group, or `None` when nothing happened.
    pub fn finish(mut self) -> Option<ContextOutput> {
        if !self.has_changes() {
            return None;
        }
        if !self.presence_before.is_empty() {
            self.reverse.push(HistoryEntry::Presence(std::mem::take(&mut self.presence_before)));
        }
        self.reverse.reverse();
        Some(ContextOutput {
            change: Change {
                id: self.id,
                operations: self.operations,
                presence_change: self.presence_change,
                message: self.message,
            },
            reverse: self.reverse,
            op_infos: self.op_infos,
            remap: self.remap,
        })
    }
}
