//! Tree node ids, positions and the arena node type.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::{TicketFactory, TimeTicket};
use crate::crdt::rht::Rht;

pub const TEXT_TYPE: &str = "text";

/// `(created_at, offset)`: offset is non-zero only for right pieces of split
/// text nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TreeNodeId {
    pub created_at: TimeTicket,
    pub offset: u32,
}

impl TreeNodeId {
    pub const fn new(created_at: TimeTicket, offset: u32) -> Self {
        Self { created_at, offset }
    }

    pub fn to_id_string(&self) -> String {
        format!("{}:{}", self.created_at.to_id_string(), self.offset)
    }
}

/// ID-based position: inside `parent_id`, right after `left_sibling_id`.
/// When the position is the first slot of the parent, `left_sibling_id`
/// equals `parent_id`. For text siblings the offset of `left_sibling_id`
/// addresses a character boundary inside the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreePos {
    pub parent_id: TreeNodeId,
    pub left_sibling_id: TreeNodeId,
}

impl TreePos {
    pub const fn new(parent_id: TreeNodeId, left_sibling_id: TreeNodeId) -> Self {
        Self {
            parent_id,
            left_sibling_id,
        }
    }
}

// ── TreeNode (arena) ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub(crate) struct TreeNode {
    pub(crate) id: TreeNodeId,
    pub(crate) node_type: String,
    pub(crate) value: String,
    pub(crate) attrs: Rht,
    /// All children in order, tombstones included.
    pub(crate) children: Vec<u32>,
    pub(crate) parent: Option<u32>,
    pub(crate) ins_prev: Option<TreeNodeId>,
    pub(crate) ins_next: Option<TreeNodeId>,
    pub(crate) removed_at: Option<TimeTicket>,
    /// Visible content size: characters for text, the padded sizes of live
    /// children for elements.
    pub(crate) size: usize,
}

impl TreeNode {
    pub(crate) fn element(id: TreeNodeId, node_type: impl Into<String>) -> Self {
        Self {
            id,
            node_type: node_type.into(),
            value: String::new(),
            attrs: Rht::new(),
            children: Vec::new(),
            parent: None,
            ins_prev: None,
            ins_next: None,
            removed_at: None,
            size: 0,
        }
    }

    pub(crate) fn text(id: TreeNodeId, value: impl Into<String>) -> Self {
        let value = value.into();
        let mut node = Self::element(id, TEXT_TYPE);
        node.size = value.chars().count();
        node.value = value;
        node
    }

    pub(crate) fn is_text(&self) -> bool {
        self.node_type == TEXT_TYPE
    }

    pub(crate) fn is_removed(&self) -> bool {
        self.removed_at.is_some()
    }

    pub(crate) fn padded_size(&self) -> usize {
        if self.is_text() {
            self.size
        } else {
            self.size + 2
        }
    }

    pub(crate) fn created_at(&self) -> TimeTicket {
        self.id.created_at
    }

    /// Latest removal wins; returns whether the node was alive.
    pub(crate) fn remove(&mut self, removed_at: TimeTicket) -> bool {
        let alive = !self.is_removed();
        if self.removed_at.map_or(true, |r| removed_at.after(&r)) {
            self.removed_at = Some(removed_at);
        }
        alive
    }

    pub(crate) fn can_delete(&self, max_created_at: &TimeTicket) -> bool {
        !self.created_at().after(max_created_at) && !self.is_removed()
    }

    pub(crate) fn can_restamp(&self, edited_at: &TimeTicket, max_created_at: &TimeTicket) -> bool {
        !self.created_at().after(max_created_at)
            && self.removed_at.is_some_and(|r| edited_at.after(&r))
    }

    pub(crate) fn can_style(&self, edited_at: &TimeTicket, max_created_at: &TimeTicket) -> bool {
        !self.is_text()
            && !self.created_at().after(max_created_at)
            && self.removed_at.map_or(true, |r| edited_at.after(&r))
    }
}

// ── TreeNodeData (detached subtree) ───────────────────────────────────────

/// A detached subtree with ids, as carried by tree-edit operations and
/// snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNodeData {
    pub id: TreeNodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default)]
    pub attrs: Rht,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNodeData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_at: Option<TimeTicket>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ins_prev_id: Option<TreeNodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ins_next_id: Option<TreeNodeId>,
}

impl TreeNodeData {
    pub fn is_text(&self) -> bool {
        self.node_type == TEXT_TYPE
    }

    /// Copy of the live part with every node stamped by a fresh ticket.
    pub fn restamped(&self, tickets: &mut TicketFactory) -> TreeNodeData {
        let created_at = tickets.issue();
        TreeNodeData {
            id: TreeNodeId::new(created_at, 0),
            node_type: self.node_type.clone(),
            value: self.value.clone(),
            attrs: self.attrs.restamped(created_at),
            children: self
                .children
                .iter()
                .filter(|c| c.removed_at.is_none())
                .map(|c| c.restamped(tickets))
                .collect(),
            removed_at: None,
            ins_prev_id: None,
            ins_next_id: None,
        }
    }

    /// Visible size including the open and close tokens of elements.
    pub fn padded_size(&self) -> usize {
        if self.removed_at.is_some() {
            return 0;
        }
        match &self.value {
            Some(value) if self.is_text() => value.chars().count(),
            _ => 2 + self.children.iter().map(TreeNodeData::padded_size).sum::<usize>(),
        }
    }

    pub fn to_json_value(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("type".to_owned(), Value::String(self.node_type.clone()));
        if self.is_text() {
            map.insert(
                "value".to_owned(),
                Value::String(self.value.clone().unwrap_or_default()),
            );
            return Value::Object(map);
        }
        let children = self
            .children
            .iter()
            .filter(|c| c.removed_at.is_none())
            .map(TreeNodeData::to_json_value)
            .collect();
        map.insert("children".to_owned(), Value::Array(children));
        if !self.attrs.is_empty() {
            map.insert("attributes".to_owned(), self.attrs.to_json_value());
        }
        Value::Object(map)
    }
}

// ── TreeNodeSpec (user input) ─────────────────────────────────────────────

/// Content to insert, before ids are assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNodeSpec {
    Text {
        #[serde(rename = "type")]
        node_type: TextTag,
        value: String,
    },
    Element {
        #[serde(rename = "type")]
        node_type: String,
        #[serde(default)]
        children: Vec<TreeNodeSpec>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        attributes: BTreeMap<String, Value>,
    },
}

/// Marker deserializing only from the string `"text"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextTag {
    #[serde(rename = "text")]
    Text,
}

impl TreeNodeSpec {
    pub fn text(value: impl Into<String>) -> Self {
        TreeNodeSpec::Text {
            node_type: TextTag::Text,
            value: value.into(),
        }
    }

    pub fn element(node_type: impl Into<String>) -> Self {
        TreeNodeSpec::Element {
            node_type: node_type.into(),
            children: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_children(mut self, new_children: Vec<TreeNodeSpec>) -> Self {
        if let TreeNodeSpec::Element { children, .. } = &mut self {
            *children = new_children;
        }
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if let TreeNodeSpec::Element { attributes, .. } = &mut self {
            attributes.insert(key.into(), value.into());
        }
        self
    }

    /// Assigns ids from `tickets`, parents before children.
    pub fn to_data(&self, tickets: &mut TicketFactory) -> TreeNodeData {
        let created_at = tickets.issue();
        let id = TreeNodeId::new(created_at, 0);
        match self {
            TreeNodeSpec::Text { value, .. } => TreeNodeData {
                id,
                node_type: TEXT_TYPE.to_owned(),
                value: Some(value.clone()),
                attrs: Rht::new(),
                children: Vec::new(),
                removed_at: None,
                ins_prev_id: None,
                ins_next_id: None,
            },
            TreeNodeSpec::Element {
                node_type,
                children,
                attributes,
            } => {
                let mut attrs = Rht::new();
                for (key, value) in attributes {
                    attrs.set(key, &value.to_string(), created_at);
                }
                TreeNodeData {
                    id,
                    node_type: node_type.clone(),
                    value: None,
                    attrs,
                    children: children.iter().map(|c| c.to_data(tickets)).collect(),
                    removed_at: None,
                    ins_prev_id: None,
                    ins_next_id: None,
                }
            }
        }
    }
}
