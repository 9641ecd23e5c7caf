//! Text element: an [`RgaTreeSplit`] of styled string blocks.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::rga_tree_split::{ContentChange, RgaTreeSplit, SplitNodeId, SplitPos, SplitValue};
use super::rht::{Rht, RhtNode};
use super::root::GcChild;
use crate::clock::{ActorId, TicketFactory, TimeTicket};
use crate::error::DocError;

// ── TextValue ─────────────────────────────────────────────────────────────

/// A run of characters sharing one attribute table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextValue {
    content: String,
    len: usize,
    attrs: Rht,
}

impl TextValue {
    pub fn new(content: impl Into<String>) -> Self {
        let content = content.into();
        let len = content.chars().count();
        Self {
            content,
            len,
            attrs: Rht::new(),
        }
    }

    pub fn with_attrs(content: impl Into<String>, attrs: Rht) -> Self {
        let mut value = Self::new(content);
        value.attrs = attrs;
        value
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn attrs(&self) -> &Rht {
        &self.attrs
    }

    pub fn attrs_mut(&mut self) -> &mut Rht {
        &mut self.attrs
    }

    /// Live attributes as encoded strings.
    pub fn attributes(&self) -> BTreeMap<String, String> {
        self.attrs
            .iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect()
    }

    pub fn to_json_value(&self) -> Value {
        let mut map = Map::new();
        if !self.attrs.is_empty() {
            map.insert("attrs".to_owned(), self.attrs.to_json_value());
        }
        map.insert("val".to_owned(), Value::String(self.content.clone()));
        Value::Object(map)
    }
}

impl SplitValue for TextValue {
    fn len(&self) -> usize {
        self.len
    }

    fn split_at_offset(&mut self, at: usize) -> Self {
        let right = self.content.split_at_offset(at);
        self.len = at;
        TextValue {
            len: right.chars().count(),
            content: right,
            attrs: self.attrs.clone(),
        }
    }
}

// ── results ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TextEdit {
    pub caret: SplitPos,
    pub changes: Vec<ContentChange<TextValue>>,
    pub created_at_by_actor: BTreeMap<ActorId, TimeTicket>,
    pub gc_children: Vec<GcChild>,
    /// Deleted runs in document order.
    pub removed: Vec<TextValue>,
    pub from_index: usize,
}

/// One styled run and the values its attributes had before.
#[derive(Debug, Clone, PartialEq)]
pub struct StyledRun {
    pub from: usize,
    pub to: usize,
    pub previous: BTreeMap<String, Option<String>>,
}

#[derive(Debug, Clone)]
pub struct TextStyle {
    pub runs: Vec<StyledRun>,
    pub created_at_by_actor: BTreeMap<ActorId, TimeTicket>,
    pub gc_children: Vec<GcChild>,
}

// ── CrdtText ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct CrdtText {
    rga: RgaTreeSplit<TextValue>,
}

impl CrdtText {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rga(rga: RgaTreeSplit<TextValue>) -> Self {
        Self { rga }
    }

    pub fn rga(&self) -> &RgaTreeSplit<TextValue> {
        &self.rga
    }

    /// Replaces `range` with `content`. An empty `content` only deletes.
    pub fn edit(
        &mut self,
        range: (&SplitPos, &SplitPos),
        content: &str,
        attributes: Option<&BTreeMap<String, String>>,
        edited_at: TimeTicket,
        latest_created_at_by_actor: Option<&BTreeMap<ActorId, TimeTicket>>,
    ) -> Result<TextEdit, DocError> {
        let value = (!content.is_empty()).then(|| {
            let mut value = TextValue::new(content);
            for (key, v) in attributes.into_iter().flatten() {
                value.attrs.set(key, v, edited_at);
            }
            value
        });
        let result = self
            .rga
            .edit(range, edited_at, value, latest_created_at_by_actor)?;
        Ok(TextEdit {
            caret: result.caret,
            changes: result.changes,
            created_at_by_actor: result.created_at_by_actor,
            gc_children: result.gc_nodes.into_iter().map(GcChild::TextNode).collect(),
            removed: result.removed_values,
            from_index: result.from_index,
        })
    }

    /// Sets `attributes` on every run in `range` the editor had seen.
    pub fn set_style(
        &mut self,
        range: (&SplitPos, &SplitPos),
        attributes: &BTreeMap<String, String>,
        edited_at: TimeTicket,
        latest_created_at_by_actor: Option<&BTreeMap<ActorId, TimeTicket>>,
    ) -> Result<TextStyle, DocError> {
        self.restyle(range, edited_at, latest_created_at_by_actor, |attrs| {
            let mut previous = BTreeMap::new();
            let mut gc = Vec::new();
            for (key, value) in attributes {
                let update = attrs.set(key, value, edited_at);
                previous.insert(key.clone(), update.previous_value().map(str::to_owned));
                gc.extend(update.gc_nodes);
            }
            (previous, gc)
        })
    }

    /// Removes `keys` from every run in `range` the editor had seen.
    pub fn remove_style(
        &mut self,
        range: (&SplitPos, &SplitPos),
        keys: &[String],
        edited_at: TimeTicket,
        latest_created_at_by_actor: Option<&BTreeMap<ActorId, TimeTicket>>,
    ) -> Result<TextStyle, DocError> {
        self.restyle(range, edited_at, latest_created_at_by_actor, |attrs| {
            let mut previous = BTreeMap::new();
            let mut gc = Vec::new();
            for key in keys {
                let update = attrs.remove(key, edited_at);
                previous.insert(key.clone(), update.previous_value().map(str::to_owned));
                gc.extend(update.gc_nodes);
            }
            (previous, gc)
        })
    }

    fn restyle<F>(
        &mut self,
        range: (&SplitPos, &SplitPos),
        edited_at: TimeTicket,
        latest: Option<&BTreeMap<ActorId, TimeTicket>>,
        mut apply: F,
    ) -> Result<TextStyle, DocError>
    where
        F: FnMut(&mut Rht) -> (BTreeMap<String, Option<String>>, Vec<RhtNode>),
    {
        let (nodes, created_at_by_actor) = self.rga.styleable_nodes(range, &edited_at, latest)?;
        let mut runs = Vec::new();
        let mut gc_children: Vec<GcChild> = self
            .rga
            .take_split_tombstones()
            .into_iter()
            .map(GcChild::TextNode)
            .collect();
        for node in nodes {
            let (from, to) = self.rga.index_range(node);
            let id = self.rga.node_id(node);
            let (previous, gc) = apply(self.rga.value_mut(node).attrs_mut());
            gc_children.extend(gc.into_iter().map(|n| GcChild::TextAttr {
                node: id,
                key: n.key().to_owned(),
                updated_at: n.updated_at(),
            }));
            runs.push(StyledRun { from, to, previous });
        }
        Ok(TextStyle {
            runs,
            created_at_by_actor,
            gc_children,
        })
    }

    pub fn index_range_to_pos_range(
        &self,
        from: usize,
        to: usize,
    ) -> Result<(SplitPos, SplitPos), DocError> {
        let from_pos = self.rga.find_node_pos(from)?;
        if from == to {
            return Ok((from_pos, from_pos));
        }
        Ok((from_pos, self.rga.find_node_pos(to)?))
    }

    pub fn find_indexes_from_range(
        &self,
        range: (&SplitPos, &SplitPos),
    ) -> Result<(usize, usize), DocError> {
        Ok((
            self.rga.pos_to_index(range.0, false)?,
            self.rga.pos_to_index(range.1, true)?,
        ))
    }

    /// Visible length in characters.
    pub fn len(&self) -> usize {
        self.rga.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rga.is_empty()
    }

    pub fn removed_at(&self, id: &SplitNodeId) -> Option<TimeTicket> {
        self.rga.removed_at(id)
    }

    pub fn purge_node(&mut self, id: &SplitNodeId) -> bool {
        self.rga.purge(id)
    }

    pub fn purge_attr(&mut self, id: &SplitNodeId, key: &str, updated_at: TimeTicket) -> bool {
        let Some(value) = self.rga.value_by_id_mut(id) else {
            return false;
        };
        match value.attrs.node(key).filter(|n| n.updated_at() == updated_at).cloned() {
            Some(node) => value.attrs.purge(&node),
            None => false,
        }
    }

    /// Every attribute tombstone, used to rebuild GC bookkeeping.
    pub fn attr_tombstones(&self) -> Vec<GcChild> {
        self.rga
            .blocks()
            .flat_map(|(id, value, _)| {
                value.attrs.nodes().filter(|n| n.is_removed()).map(move |n| GcChild::TextAttr {
                    node: id,
                    key: n.key().to_owned(),
                    updated_at: n.updated_at(),
                })
            })
            .collect()
    }

    /// Fresh copy of the live runs, every run stamped with a new ticket.
    pub fn restamped(&self, tickets: &mut TicketFactory) -> CrdtText {
        let mut rga = RgaTreeSplit::new();
        for value in self.rga.values() {
            let created_at = tickets.issue();
            let copy = TextValue::with_attrs(value.content.clone(), value.attrs.restamped(created_at));
            rga.push(SplitNodeId::new(created_at, 0), copy, None);
        }
        CrdtText { rga }
    }

    pub fn to_json_value(&self) -> Value {
        Value::Array(self.rga.values().map(TextValue::to_json_value).collect())
    }
}

impl std::fmt::Display for CrdtText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for value in self.rga.values() {
            f.write_str(&value.content)?;
        }
        Ok(())
    }
}
