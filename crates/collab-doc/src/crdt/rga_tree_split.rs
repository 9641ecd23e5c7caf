//! RGATreeSplit: a replicated sequence of splittable blocks.
//!
//! Each insertion creates one block whose id is `(created_at, 0)`. Later
//! edits that land inside a block split it; the right part keeps the
//! creation ticket and gets an id offset, so `(created_at, offset)` stays a
//! stable address for every character ever inserted. Positions are expressed
//! against those ids and resolved with a floor lookup in an ordered id index.
//!
//! Besides document order (`prev`/`next`) every block remembers the block it
//! was split from (`ins_prev`/`ins_next`), which lets a position on a split
//! boundary prefer the left piece. A splay rank tree weighted by visible
//! length answers index queries.

use std::collections::BTreeMap;
use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use splay_forest::types::{Node, WeightedNode};

use crate::clock::{ActorId, TimeTicket};
use crate::error::DocError;

// ── SplitValue ────────────────────────────────────────────────────────────

/// Payload of a block.
pub trait SplitValue: Clone + Debug + Default {
    /// Length in user-visible units.
    fn len(&self) -> usize;
    /// Keeps `[0, at)` in `self` and returns `[at, len)`.
    fn split_at_offset(&mut self, at: usize) -> Self;
}

// ── ids & positions ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SplitNodeId {
    pub created_at: TimeTicket,
    pub offset: u32,
}

impl SplitNodeId {
    pub const fn new(created_at: TimeTicket, offset: u32) -> Self {
        Self { created_at, offset }
    }

    pub fn to_id_string(&self) -> String {
        format!("{}:{}", self.created_at.to_id_string(), self.offset)
    }
}

/// A position: `relative_offset` units into the block `id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitPos {
    pub id: SplitNodeId,
    pub relative_offset: u32,
}

impl SplitPos {
    pub const fn new(id: SplitNodeId, relative_offset: u32) -> Self {
        Self {
            id,
            relative_offset,
        }
    }

    pub fn absolute_id(&self) -> SplitNodeId {
        SplitNodeId::new(self.id.created_at, self.id.offset + self.relative_offset)
    }
}

/// Index-based description of a content change, in pre-edit coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentChange<V> {
    pub actor: ActorId,
    pub from: usize,
    pub to: usize,
    pub value: Option<V>,
}

/// Result of [`RgaTreeSplit::edit`].
#[derive(Debug, Clone)]
pub struct SplitEdit<V> {
    pub caret: SplitPos,
    /// Latest creation ticket per actor among the blocks this edit deleted.
    pub created_at_by_actor: BTreeMap<ActorId, TimeTicket>,
    /// Blocks that became tombstones and must be registered for GC.
    pub gc_nodes: Vec<SplitNodeId>,
    pub changes: Vec<ContentChange<V>>,
    /// Deleted payloads in document order.
    pub removed_values: Vec<V>,
    /// Index at which the inserted block (if any) starts.
    pub from_index: usize,
}

// ── SplitNode ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub(crate) struct SplitNode<V> {
    id: SplitNodeId,
    value: V,
    removed_at: Option<TimeTicket>,
    prev: Option<u32>,
    next: Option<u32>,
    ins_prev: Option<u32>,
    ins_next: Option<u32>,
    p: Option<u32>,
    l: Option<u32>,
    r: Option<u32>,
    weight: usize,
}

impl<V: SplitValue> SplitNode<V> {
    fn new(id: SplitNodeId, value: V, removed_at: Option<TimeTicket>) -> Self {
        let weight = if removed_at.is_some() { 0 } else { value.len() };
        Self {
            id,
            value,
            removed_at,
            prev: None,
            next: None,
            ins_prev: None,
            ins_next: None,
            p: None,
            l: None,
            r: None,
            weight,
        }
    }

    fn created_at(&self) -> TimeTicket {
        self.id.created_at
    }

    fn is_removed(&self) -> bool {
        self.removed_at.is_some()
    }

    fn can_delete(&self, max_created_at: &TimeTicket) -> bool {
        !self.created_at().after(max_created_at) && !self.is_removed()
    }

    fn can_style(&self, edited_at: &TimeTicket, max_created_at: &TimeTicket) -> bool {
        !self.created_at().after(max_created_at)
            && self.removed_at.map_or(true, |r| edited_at.after(&r))
    }

    /// A tombstone the editor knew of that an overlapping delete removes
    /// again with a later ticket.
    fn can_restamp(&self, edited_at: &TimeTicket, max_created_at: &TimeTicket) -> bool {
        !self.created_at().after(max_created_at)
            && self.removed_at.is_some_and(|r| edited_at.after(&r))
    }
}

impl<V> Node for SplitNode<V> {
    fn p(&self) -> Option<u32> {
        self.p
    }
    fn l(&self) -> Option<u32> {
        self.l
    }
    fn r(&self) -> Option<u32> {
        self.r
    }
    fn set_p(&mut self, v: Option<u32>) {
        self.p = v;
    }
    fn set_l(&mut self, v: Option<u32>) {
        self.l = v;
    }
    fn set_r(&mut self, v: Option<u32>) {
        self.r = v;
    }
}

impl<V: SplitValue> WeightedNode for SplitNode<V> {
    fn len(&self) -> usize {
        if self.removed_at.is_some() {
            0
        } else {
            self.value.len()
        }
    }
    fn weight(&self) -> usize {
        self.weight
    }
    fn set_weight(&mut self, weight: usize) {
        self.weight = weight;
    }
}

/// Editor's knowledge bound for blocks of `actor`: local edits see
/// everything; remote edits only what their author had seen.
pub(crate) fn max_created_at(
    latest: Option<&BTreeMap<ActorId, TimeTicket>>,
    actor: &ActorId,
) -> TimeTicket {
    match latest {
        None => TimeTicket::MAX,
        Some(map) => map.get(actor).copied().unwrap_or(TimeTicket::INITIAL),
    }
}

// ── RgaTreeSplit ──────────────────────────────────────────────────────────

const HEAD: u32 = 0;

#[derive(Debug, Clone)]
pub struct RgaTreeSplit<V> {
    nodes: Vec<SplitNode<V>>,
    free: Vec<u32>,
    root: Option<u32>,
    by_id: BTreeMap<SplitNodeId, u32>,
    split_tombstones: Vec<SplitNodeId>,
}

impl<V: SplitValue> Default for RgaTreeSplit<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: SplitValue> RgaTreeSplit<V> {
    pub fn new() -> Self {
        let head_id = SplitNodeId::new(TimeTicket::INITIAL, 0);
        let mut nodes = vec![SplitNode::new(head_id, V::default(), None)];
        let root = splay_forest::insert_after(&mut nodes, None, None, HEAD);
        let mut by_id = BTreeMap::new();
        by_id.insert(head_id, HEAD);
        Self {
            nodes,
            free: Vec::new(),
            root,
            by_id,
            split_tombstones: Vec::new(),
        }
    }

    // ── arena helpers ────────────────────────────────────────────────────

    fn alloc(&mut self, node: SplitNode<V>) -> u32 {
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx as usize] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                (self.nodes.len() - 1) as u32
            }
        }
    }

    fn set_ins_prev(&mut self, node: u32, ins_prev: Option<u32>) {
        self.nodes[node as usize].ins_prev = ins_prev;
        if let Some(p) = ins_prev {
            self.nodes[p as usize].ins_next = Some(node);
        }
    }

    /// Links `node` after `prev` in document order and in the rank tree.
    fn insert_node_after(&mut self, prev: u32, node: u32) {
        let next = self.nodes[prev as usize].next;
        self.nodes[node as usize].prev = Some(prev);
        self.nodes[node as usize].next = next;
        self.nodes[prev as usize].next = Some(node);
        if let Some(n) = next {
            self.nodes[n as usize].prev = Some(node);
        }
        let id = self.nodes[node as usize].id;
        self.by_id.insert(id, node);
        self.root = splay_forest::insert_after(&mut self.nodes, self.root, Some(prev), node);
    }

    /// Appends a block at the end; used when rebuilding from a snapshot.
    pub fn push(&mut self, id: SplitNodeId, value: V, removed_at: Option<TimeTicket>) {
        let mut last = HEAD;
        while let Some(next) = self.nodes[last as usize].next {
            last = next;
        }
        let piece_of = self.find_floor_node(&id);
        let idx = self.alloc(SplitNode::new(id, value, removed_at));
        self.insert_node_after(last, idx);
        if id.offset > 0 {
            self.set_ins_prev(idx, piece_of);
        }
    }

    // ── lookups ──────────────────────────────────────────────────────────

    fn find_floor_node(&self, id: &SplitNodeId) -> Option<u32> {
        let (floor_id, &idx) = self.by_id.range(..=*id).next_back()?;
        (floor_id.created_at == id.created_at).then_some(idx)
    }

    /// Floor lookup that resolves a position sitting exactly on a split
    /// boundary to the end of the left piece.
    fn find_floor_node_prefer_to_left(&self, id: &SplitNodeId) -> Result<u32, DocError> {
        let not_found = || DocError::PositionNotFound(id.to_id_string());
        let node = self.find_floor_node(id).ok_or_else(not_found)?;
        if id.offset > 0 && self.nodes[node as usize].id.offset == id.offset {
            return Ok(self.nodes[node as usize].ins_prev.unwrap_or(node));
        }
        Ok(node)
    }

    /// Splits `node` at `offset` units. Returns the right piece, the
    /// following block when splitting at the end, or `node` itself at 0.
    fn split_node(&mut self, node: u32, offset: usize) -> Result<Option<u32>, DocError> {
        let len = self.nodes[node as usize].value.len();
        if offset > len {
            return Err(DocError::PositionNotFound(format!(
                "offset {offset} beyond block {} of length {len}",
                self.nodes[node as usize].id.to_id_string()
            )));
        }
        if offset == 0 {
            return Ok(Some(node));
        }
        if offset == len {
            return Ok(self.nodes[node as usize].next);
        }
        let n = &mut self.nodes[node as usize];
        let id = SplitNodeId::new(n.id.created_at, n.id.offset + offset as u32);
        let right_value = n.value.split_at_offset(offset);
        let removed_at = n.removed_at;
        let ins_next = n.ins_next;
        let split = self.alloc(SplitNode::new(id, right_value, removed_at));
        self.insert_node_after(node, split);
        if let Some(ins_next) = ins_next {
            self.set_ins_prev(ins_next, Some(split));
        }
        self.set_ins_prev(split, Some(node));
        if removed_at.is_some() {
            self.split_tombstones.push(id);
        }
        Ok(Some(split))
    }

    /// Splits at `pos` and returns the blocks left and right of it, skipping
    /// blocks inserted concurrently with a later ticket than `edited_at`.
    pub(crate) fn find_node_with_split(
        &mut self,
        pos: &SplitPos,
        edited_at: &TimeTicket,
    ) -> Result<(u32, Option<u32>), DocError> {
        let absolute = pos.absolute_id();
        let mut node = self.find_floor_node_prefer_to_left(&absolute)?;
        let relative = (absolute.offset - self.nodes[node as usize].id.offset) as usize;
        self.split_node(node, relative)?;
        while let Some(next) = self.nodes[node as usize].next {
            if self.nodes[next as usize].created_at().after(edited_at) {
                node = next;
            } else {
                break;
            }
        }
        Ok((node, self.nodes[node as usize].next))
    }

    pub(crate) fn find_between(&self, from: Option<u32>, to: Option<u32>) -> Vec<u32> {
        let mut nodes = Vec::new();
        let mut current = from;
        while let Some(idx) = current {
            if Some(idx) == to {
                break;
            }
            nodes.push(idx);
            current = self.nodes[idx as usize].next;
        }
        nodes
    }

    /// Resolves both ends of `range` and returns the blocks between them.
    pub(crate) fn split_range(
        &mut self,
        range: (&SplitPos, &SplitPos),
        edited_at: &TimeTicket,
    ) -> Result<Vec<u32>, DocError> {
        let (_, to_right) = self.find_node_with_split(range.1, edited_at)?;
        let (_, from_right) = self.find_node_with_split(range.0, edited_at)?;
        Ok(self.find_between(from_right, to_right))
    }

    /// Position of the `index`-th visible unit.
    pub fn find_node_pos(&self, index: usize) -> Result<SplitPos, DocError> {
        let (node, offset) = splay_forest::locate(&self.nodes, self.root, index)
            .ok_or_else(|| DocError::PositionNotFound(format!("index {index}")))?;
        Ok(SplitPos::new(self.nodes[node as usize].id, offset as u32))
    }

    pub fn pos_to_index(&self, pos: &SplitPos, prefer_to_left: bool) -> Result<usize, DocError> {
        let absolute = pos.absolute_id();
        let node = if prefer_to_left {
            self.find_floor_node_prefer_to_left(&absolute)?
        } else {
            self.find_floor_node(&absolute)
                .ok_or_else(|| DocError::PositionNotFound(absolute.to_id_string()))?
        };
        let n = &self.nodes[node as usize];
        let offset = if n.is_removed() {
            0
        } else {
            (absolute.offset - n.id.offset) as usize
        };
        Ok(splay_forest::index_of(&self.nodes, node) + offset)
    }

    /// Visible index range covered by `node`.
    pub(crate) fn index_range(&self, node: u32) -> (usize, usize) {
        let from = splay_forest::index_of(&self.nodes, node);
        (from, from + self.nodes[node as usize].len())
    }

    // ── editing ──────────────────────────────────────────────────────────

    pub fn edit(
        &mut self,
        range: (&SplitPos, &SplitPos),
        edited_at: TimeTicket,
        value: Option<V>,
        latest_created_at_by_actor: Option<&BTreeMap<ActorId, TimeTicket>>,
    ) -> Result<SplitEdit<V>, DocError> {
        self.split_tombstones.clear();
        let (to_left, to_right) = self.find_node_with_split(range.1, &edited_at)?;
        let (from_left, from_right) = self.find_node_with_split(range.0, &edited_at)?;

        let candidates = self.find_between(from_right, to_right);
        let deleted = self.delete_nodes(&candidates, &edited_at, latest_created_at_by_actor);

        let caret_id = to_right.map_or(self.nodes[to_left as usize].id, |r| self.nodes[r as usize].id);
        let mut caret = SplitPos::new(caret_id, 0);
        let (_, from_index) = self.index_range(from_left);

        let mut changes = deleted.changes;
        if let Some(value) = value {
            let id = SplitNodeId::new(edited_at, 0);
            let len = value.len();
            let inserted = self.alloc(SplitNode::new(id, value.clone(), None));
            self.insert_node_after(from_left, inserted);
            match changes.last_mut() {
                Some(last) if last.from == from_index => last.value = Some(value),
                _ => changes.push(ContentChange {
                    actor: edited_at.actor(),
                    from: from_index,
                    to: from_index,
                    value: Some(value),
                }),
            }
            caret = SplitPos::new(id, len as u32);
        }

        let mut gc_nodes = deleted.removed;
        gc_nodes.append(&mut self.split_tombstones);
        Ok(SplitEdit {
            caret,
            created_at_by_actor: deleted.created_at_by_actor,
            gc_nodes,
            changes,
            removed_values: deleted.removed_values,
            from_index,
        })
    }

    fn delete_nodes(
        &mut self,
        candidates: &[u32],
        edited_at: &TimeTicket,
        latest: Option<&BTreeMap<ActorId, TimeTicket>>,
    ) -> DeletedNodes<V> {
        let mut out = DeletedNodes {
            changes: Vec::new(),
            created_at_by_actor: BTreeMap::new(),
            removed: Vec::new(),
            removed_values: Vec::new(),
        };
        let (Some(&first), Some(&last)) = (candidates.first(), candidates.last()) else {
            return out;
        };
        // Blocks that survive split the range into runs; every run becomes
        // one index change. The edges of the candidate list bound it.
        let mut to_delete = Vec::new();
        let mut to_restamp = Vec::new();
        let mut boundaries = vec![self.nodes[first as usize].prev];
        for &idx in candidates {
            let node = &self.nodes[idx as usize];
            let max = max_created_at(latest, &node.created_at().actor());
            if node.can_delete(&max) {
                to_delete.push(idx);
            } else {
                if node.can_restamp(edited_at, &max) {
                    to_restamp.push(idx);
                }
                boundaries.push(Some(idx));
            }
        }
        boundaries.push(self.nodes[last as usize].next);
        out.changes = self.make_changes(&boundaries, edited_at);

        for idx in to_delete {
            let node = &mut self.nodes[idx as usize];
            let created_at = node.created_at();
            let actor = created_at.actor();
            let latest = out.created_at_by_actor.entry(actor).or_insert(created_at);
            if created_at.after(latest) {
                *latest = created_at;
            }
            out.removed_values.push(node.value.clone());
            node.removed_at = Some(*edited_at);
            out.removed.push(node.id);
            self.root = splay_forest::splay(&mut self.nodes, self.root, idx);
        }
        // tombstones keep the latest removal; weights and GC entries stay
        for idx in to_restamp {
            self.nodes[idx as usize].removed_at = Some(*edited_at);
        }
        out
    }

    fn make_changes(&self, boundaries: &[Option<u32>], edited_at: &TimeTicket) -> Vec<ContentChange<V>> {
        let mut changes = Vec::new();
        for pair in boundaries.windows(2) {
            let (Some(left), right) = (pair[0], pair[1]) else {
                continue;
            };
            if self.nodes[left as usize].next == right {
                continue;
            }
            let (_, from) = self.index_range(left);
            let to = match right {
                Some(r) => self.index_range(r).0,
                None => self.len(),
            };
            if from < to {
                changes.push(ContentChange {
                    actor: edited_at.actor(),
                    from,
                    to,
                    value: None,
                });
            }
        }
        changes.reverse();
        changes
    }

    // ── styling support ──────────────────────────────────────────────────

    /// Blocks in `range` the editor may style, with the per-actor map of
    /// their creation tickets.
    pub(crate) fn styleable_nodes(
        &mut self,
        range: (&SplitPos, &SplitPos),
        edited_at: &TimeTicket,
        latest: Option<&BTreeMap<ActorId, TimeTicket>>,
    ) -> Result<(Vec<u32>, BTreeMap<ActorId, TimeTicket>), DocError> {
        self.split_tombstones.clear();
        let candidates = self.split_range(range, edited_at)?;
        let mut created_at_by_actor = BTreeMap::new();
        let mut nodes = Vec::new();
        for idx in candidates {
            let node = &self.nodes[idx as usize];
            let created_at = node.created_at();
            let max = max_created_at(latest, &created_at.actor());
            if node.can_style(edited_at, &max) {
                let entry = created_at_by_actor
                    .entry(created_at.actor())
                    .or_insert(created_at);
                if created_at.after(entry) {
                    *entry = created_at;
                }
                if !node.is_removed() {
                    nodes.push(idx);
                }
            }
        }
        Ok((nodes, created_at_by_actor))
    }

    /// Tombstone fragments created by splits since the last edit or style.
    pub(crate) fn take_split_tombstones(&mut self) -> Vec<SplitNodeId> {
        std::mem::take(&mut self.split_tombstones)
    }

    pub(crate) fn node_id(&self, node: u32) -> SplitNodeId {
        self.nodes[node as usize].id
    }

    pub(crate) fn value_mut(&mut self, node: u32) -> &mut V {
        &mut self.nodes[node as usize].value
    }

    pub fn value_by_id(&self, id: &SplitNodeId) -> Option<&V> {
        self.by_id.get(id).map(|&idx| &self.nodes[idx as usize].value)
    }

    pub fn value_by_id_mut(&mut self, id: &SplitNodeId) -> Option<&mut V> {
        let idx = *self.by_id.get(id)?;
        Some(&mut self.nodes[idx as usize].value)
    }

    pub fn removed_at(&self, id: &SplitNodeId) -> Option<TimeTicket> {
        self.by_id
            .get(id)
            .and_then(|&idx| self.nodes[idx as usize].removed_at)
    }

    // ── GC ───────────────────────────────────────────────────────────────

    /// Unlinks a collected tombstone block.
    pub fn purge(&mut self, id: &SplitNodeId) -> bool {
        let Some(&idx) = self.by_id.get(id) else {
            return false;
        };
        if idx == HEAD {
            return false;
        }
        let SplitNode {
            prev,
            next,
            ins_prev,
            ins_next,
            ..
        } = self.nodes[idx as usize];
        if let Some(p) = prev {
            self.nodes[p as usize].next = next;
        }
        if let Some(n) = next {
            self.nodes[n as usize].prev = prev;
        }
        if let Some(p) = ins_prev {
            self.nodes[p as usize].ins_next = ins_next;
        }
        if let Some(n) = ins_next {
            self.nodes[n as usize].ins_prev = ins_prev;
        }
        self.root = splay_forest::remove(&mut self.nodes, self.root, idx);
        self.by_id.remove(id);
        self.nodes[idx as usize] = SplitNode::new(SplitNodeId::new(TimeTicket::INITIAL, 0), V::default(), None);
        self.free.push(idx);
        true
    }

    // ── iteration ────────────────────────────────────────────────────────

    /// `(id, value, removed_at)` of every block in document order, head
    /// excluded.
    pub fn blocks(&self) -> impl Iterator<Item = (SplitNodeId, &V, Option<TimeTicket>)> {
        let mut curr = self.nodes[HEAD as usize].next;
        std::iter::from_fn(move || {
            let idx = curr?;
            let node = &self.nodes[idx as usize];
            curr = node.next;
            Some((node.id, &node.value, node.removed_at))
        })
    }

    /// Live payloads in document order.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.blocks()
            .filter(|(_, _, removed_at)| removed_at.is_none())
            .map(|(_, value, _)| value)
    }

    /// Total visible length.
    pub fn len(&self) -> usize {
        splay_forest::weight_of(&self.nodes, self.root)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct DeletedNodes<V> {
    changes: Vec<ContentChange<V>>,
    created_at_by_actor: BTreeMap<ActorId, TimeTicket>,
    removed: Vec<SplitNodeId>,
    removed_values: Vec<V>,
}

impl SplitValue for String {
    fn len(&self) -> usize {
        self.chars().count()
    }

    fn split_at_offset(&mut self, at: usize) -> Self {
        let byte_pos = self
            .char_indices()
            .nth(at)
            .map_or(String::len(self), |(i, _)| i);
        self.split_off(byte_pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(n: u8) -> ActorId {
        let mut bytes = [0u8; 12];
        bytes[11] = n;
        ActorId::new(bytes)
    }

    fn t(lamport: u64, a: u8) -> TimeTicket {
        TimeTicket::new(lamport, 0, actor(a))
    }

    fn content(rga: &RgaTreeSplit<String>) -> String {
        rga.values().map(String::as_str).collect()
    }

    fn edit(rga: &mut RgaTreeSplit<String>, from: usize, to: usize, s: &str, at: TimeTicket) -> SplitEdit<String> {
        let from = rga.find_node_pos(from).unwrap();
        let to = rga.find_node_pos(to).unwrap();
        let value = (!s.is_empty()).then(|| s.to_owned());
        rga.edit((&from, &to), at, value, None).unwrap()
    }

    #[test]
    fn edit_replaces_range() {
        let mut rga = RgaTreeSplit::<String>::new();
        edit(&mut rga, 0, 0, "ABCD", t(1, 1));
        let result = edit(&mut rga, 1, 3, "12", t(2, 1));
        assert_eq!(content(&rga), "A12D");
        assert_eq!(result.removed_values, vec!["BC".to_owned()]);
        assert_eq!(result.from_index, 1);
        assert_eq!(result.gc_nodes, vec![SplitNodeId::new(t(1, 1), 1)]);
        assert_eq!(result.changes.len(), 1);
        assert_eq!((result.changes[0].from, result.changes[0].to), (1, 3));
        assert_eq!(rga.len(), 4);
    }

    #[test]
    fn positions_survive_splits() {
        let mut rga = RgaTreeSplit::<String>::new();
        edit(&mut rga, 0, 0, "hello", t(1, 1));
        let pos = rga.find_node_pos(3).unwrap();
        edit(&mut rga, 1, 1, "XY", t(2, 1));
        assert_eq!(content(&rga), "hXYello");
        assert_eq!(rga.pos_to_index(&pos, true).unwrap(), 5);
    }

    #[test]
    fn remote_delete_spares_unseen_inserts() {
        let mut rga = RgaTreeSplit::<String>::new();
        edit(&mut rga, 0, 0, "abc", t(1, 1));
        let from = rga.find_node_pos(0).unwrap();
        let to = rga.find_node_pos(3).unwrap();
        // concurrent insert by actor 2 inside the range
        edit(&mut rga, 1, 1, "Z", t(2, 2));
        let mut seen = BTreeMap::new();
        seen.insert(actor(1), t(1, 1));
        rga.edit((&from, &to), t(2, 1), None, Some(&seen)).unwrap();
        assert_eq!(content(&rga), "Z");
    }

    #[test]
    fn concurrent_inserts_at_same_position_converge() {
        let mut a = RgaTreeSplit::<String>::new();
        let mut b = RgaTreeSplit::<String>::new();
        let origin = SplitPos::new(SplitNodeId::new(TimeTicket::INITIAL, 0), 0);
        a.edit((&origin, &origin), t(1, 1), Some("x".into()), None).unwrap();
        a.edit((&origin, &origin), t(1, 2), Some("y".into()), None).unwrap();
        b.edit((&origin, &origin), t(1, 2), Some("y".into()), None).unwrap();
        b.edit((&origin, &origin), t(1, 1), Some("x".into()), None).unwrap();
        assert_eq!(content(&a), content(&b));
        assert_eq!(content(&a), "yx");
    }

    #[test]
    fn purge_unlinks_tombstones() {
        let mut rga = RgaTreeSplit::<String>::new();
        edit(&mut rga, 0, 0, "abcd", t(1, 1));
        let result = edit(&mut rga, 1, 3, "", t(2, 1));
        for id in &result.gc_nodes {
            assert!(rga.purge(id));
        }
        assert_eq!(content(&rga), "ad");
        assert_eq!(rga.blocks().count(), 2);
        let end = rga.find_node_pos(2).unwrap();
        assert_eq!(rga.pos_to_index(&end, true).unwrap(), 2);
    }

    #[test]
    fn splits_multibyte_text_by_chars() {
        let mut s = "héllo".to_owned();
        let right = s.split_at_offset(2);
        assert_eq!((s.as_str(), right.as_str()), ("hé", "llo"));
    }
}
