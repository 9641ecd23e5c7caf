//! RHT: a last-writer-wins map of string attributes.
//!
//! Used for text styles and tree node attributes. Every write carries a
//! ticket; a write only lands when its ticket is after the ticket of the
//! entry currently stored under the key, so the final value per key is the
//! max-ticket write regardless of delivery order. Removals leave tombstones
//! that are reclaimed by garbage collection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::clock::TimeTicket;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RhtNode {
    key: String,
    value: String,
    updated_at: TimeTicket,
    removed: bool,
}

impl RhtNode {
    pub fn new(key: impl Into<String>, value: impl Into<String>, updated_at: TimeTicket) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            updated_at,
            removed: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// JSON-encoded value.
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn updated_at(&self) -> TimeTicket {
        self.updated_at
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// A tombstone is removed at the ticket that wrote it.
    pub fn removed_at(&self) -> Option<TimeTicket> {
        self.removed.then_some(self.updated_at)
    }
}

/// Outcome of [`Rht::set`] and [`Rht::remove`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RhtUpdate {
    /// The write landed.
    pub applied: bool,
    /// Entry stored under the key before the write.
    pub previous: Option<RhtNode>,
    /// Tombstones whose GC registration changes: a replaced tombstone must be
    /// unregistered, a new tombstone registered. Both toggle the same way.
    pub gc_nodes: Vec<RhtNode>,
}

impl RhtUpdate {
    /// Value that was live before the write, if any.
    pub fn previous_value(&self) -> Option<&str> {
        self.previous
            .as_ref()
            .filter(|n| !n.is_removed())
            .map(RhtNode::value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rht {
    nodes: BTreeMap<String, RhtNode>,
    removed_count: usize,
}

impl Rht {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: &str, executed_at: TimeTicket) -> RhtUpdate {
        let previous = self.nodes.get(key).cloned();
        if previous
            .as_ref()
            .is_some_and(|prev| !executed_at.after(&prev.updated_at))
        {
            return RhtUpdate {
                applied: false,
                previous,
                gc_nodes: Vec::new(),
            };
        }
        let mut gc_nodes = Vec::new();
        if let Some(prev) = previous.as_ref().filter(|p| p.removed) {
            self.removed_count -= 1;
            gc_nodes.push(prev.clone());
        }
        self.nodes
            .insert(key.to_owned(), RhtNode::new(key, value, executed_at));
        RhtUpdate {
            applied: true,
            previous,
            gc_nodes,
        }
    }

    /// Tombstones `key`. A remove of an absent key still leaves a tombstone
    /// so that an older concurrent set cannot resurrect it.
    pub fn remove(&mut self, key: &str, executed_at: TimeTicket) -> RhtUpdate {
        let previous = self.nodes.get(key).cloned();
        if previous
            .as_ref()
            .is_some_and(|prev| !executed_at.after(&prev.updated_at))
        {
            return RhtUpdate {
                applied: false,
                previous,
                gc_nodes: Vec::new(),
            };
        }
        let mut gc_nodes = Vec::new();
        match previous.as_ref() {
            Some(prev) if prev.removed => gc_nodes.push(prev.clone()),
            _ => self.removed_count += 1,
        }
        let value = previous.as_ref().map_or("", |p| p.value.as_str());
        let mut tombstone = RhtNode::new(key, value, executed_at);
        tombstone.removed = true;
        gc_nodes.push(tombstone.clone());
        self.nodes.insert(key.to_owned(), tombstone);
        RhtUpdate {
            applied: true,
            previous,
            gc_nodes,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.nodes
            .get(key)
            .filter(|n| !n.removed)
            .map(|n| n.value.as_str())
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Current node for `key`, tombstones included.
    pub fn node(&self, key: &str) -> Option<&RhtNode> {
        self.nodes.get(key)
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.nodes.len() - self.removed_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn removed_len(&self) -> usize {
        self.removed_count
    }

    /// Live `(key, encoded value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.nodes
            .values()
            .filter(|n| !n.removed)
            .map(|n| (n.key.as_str(), n.value.as_str()))
    }

    /// Every stored node, tombstones included.
    pub fn nodes(&self) -> impl Iterator<Item = &RhtNode> {
        self.nodes.values()
    }

    /// Drops `node` if it is still the tombstone stored for its key.
    pub fn purge(&mut self, node: &RhtNode) -> bool {
        match self.nodes.get(&node.key) {
            Some(current)
                if current.removed && current.updated_at == node.updated_at =>
            {
                self.nodes.remove(&node.key);
                self.removed_count -= 1;
                true
            }
            _ => false,
        }
    }

    pub fn to_json_value(&self) -> Value {
        let mut map = Map::new();
        for (key, value) in self.iter() {
            map.insert(key.to_owned(), decode_value(value));
        }
        Value::Object(map)
    }

    /// ` key="value"` pairs for XML rendering; string values are unquoted.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        for (key, value) in self.iter() {
            let text = match decode_value(value) {
                Value::String(s) => s,
                other => other.to_string(),
            };
            out.push_str(&format!(" {key}=\"{}\"", text.replace('"', "&quot;")));
        }
        out
    }

    /// Copy containing only live entries, tickets kept.
    pub fn live_copy(&self) -> Rht {
        Rht {
            nodes: self
                .nodes
                .iter()
                .filter(|(_, n)| !n.removed)
                .map(|(k, n)| (k.clone(), n.clone()))
                .collect(),
            removed_count: 0,
        }
    }

    /// Copy containing only live entries, restamped with `created_at`.
    pub fn restamped(&self, created_at: TimeTicket) -> Rht {
        let mut copy = Rht::new();
        for (key, value) in self.iter() {
            copy.nodes
                .insert(key.to_owned(), RhtNode::new(key, value, created_at));
        }
        copy
    }
}

/// Decodes a stored value; anything that is not valid JSON is rendered as a
/// plain string.
pub fn decode_value(encoded: &str) -> Value {
    serde_json::from_str(encoded).unwrap_or_else(|_| Value::String(encoded.to_owned()))
}
