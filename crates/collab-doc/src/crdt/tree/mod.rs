//! CRDTTree: a replicated XML-like tree.
//!
//! Nodes live in an arena and are addressed by `u32` handles; an ordered id
//! index maps `(created_at, offset)` to handles and answers floor lookups for
//! positions that point into split text. Every element keeps all of its
//! children, tombstones included, and caches the visible size of its content
//! so index arithmetic (see [`index`]) only walks live nodes.
//!
//! Edits are expressed against id-based [`TreePos`] values so concurrent
//! edits resolve identically on every replica; indexes and paths are only a
//! view of the local state.

pub mod index;
pub mod node;

use std::collections::{BTreeMap, HashSet};

use serde_json::{Map, Value};

use self::index::{IndexPos, TokenKind};
pub use self::index::{TreeNodeRef, TreeToken};
pub(crate) use self::node::TreeNode;
pub use self::node::{TreeNodeData, TreeNodeId, TreeNodeSpec, TreePos, TEXT_TYPE};
use super::rga_tree_split::max_created_at;
use super::rht::{Rht, RhtNode};
use super::root::GcChild;
use crate::clock::{ActorId, TicketFactory, TimeTicket};
use crate::error::DocError;

// ── results ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeChangeKind {
    Content,
    Style,
    RemoveStyle,
}

/// Index-based description of one effect of an edit or style call.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeChange {
    pub kind: TreeChangeKind,
    pub actor: ActorId,
    pub from: usize,
    pub to: usize,
    pub from_path: Vec<usize>,
    pub to_path: Vec<usize>,
    /// Inserted subtrees (`Content`).
    pub contents: Vec<TreeNodeData>,
    /// Written attributes, JSON-encoded (`Style`).
    pub attributes: BTreeMap<String, String>,
    /// Removed attribute keys (`RemoveStyle`).
    pub removed_keys: Vec<String>,
}

impl TreeChange {
    fn content(actor: ActorId, from: usize, to: usize, from_path: Vec<usize>, to_path: Vec<usize>) -> Self {
        Self {
            kind: TreeChangeKind::Content,
            actor,
            from,
            to,
            from_path,
            to_path,
            contents: Vec::new(),
            attributes: BTreeMap::new(),
            removed_keys: Vec::new(),
        }
    }
}

/// What a plain edit needs to undo this one: replace the inserted range
/// `[from_index, from_index + inserted_size)` with `removed`.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeReverse {
    pub from_index: usize,
    pub inserted_size: usize,
    pub removed: Vec<TreeNodeData>,
}

#[derive(Debug, Clone)]
pub struct TreeEdit {
    pub changes: Vec<TreeChange>,
    pub gc_children: Vec<GcChild>,
    pub created_at_by_actor: BTreeMap<ActorId, TimeTicket>,
    /// `None` when the edit split or merged elements.
    pub reverse: Option<TreeReverse>,
    /// Start of the edit in the index space it saw.
    pub from_index: usize,
    /// Tokens added at `from_index`, split boundaries included.
    pub inserted_size: usize,
}

/// Attribute values an element had before a style call, for the keys the
/// call actually wrote.
#[derive(Debug, Clone, PartialEq)]
pub struct StyledNode {
    pub id: TreeNodeId,
    pub previous: BTreeMap<String, Option<String>>,
}

#[derive(Debug, Clone)]
pub struct TreeStyle {
    pub changes: Vec<TreeChange>,
    pub gc_children: Vec<GcChild>,
    pub created_at_by_actor: BTreeMap<ActorId, TimeTicket>,
    pub styled: Vec<StyledNode>,
    pub from_index: usize,
    pub to_index: usize,
}

// ── CrdtTree ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CrdtTree {
    nodes: Vec<TreeNode>,
    free: Vec<u32>,
    root: u32,
    by_id: BTreeMap<TreeNodeId, u32>,
    split_tombstones: Vec<TreeNodeId>,
}

fn vacant() -> TreeNode {
    let mut node = TreeNode::element(TreeNodeId::new(TimeTicket::INITIAL, 0), "");
    node.removed_at = Some(TimeTicket::INITIAL);
    node
}

fn note_created_at(map: &mut BTreeMap<ActorId, TimeTicket>, created_at: TimeTicket) {
    let entry = map.entry(created_at.actor()).or_insert(created_at);
    if created_at.after(entry) {
        *entry = created_at;
    }
}

impl CrdtTree {
    /// Builds a tree whose root is `root`. Tombstones and insertion links in
    /// the data are kept, so a tree survives a snapshot round trip.
    pub fn from_data(root: &TreeNodeData) -> Result<Self, DocError> {
        if root.is_text() {
            return Err(DocError::InvalidArgument("tree root must be an element".into()));
        }
        let mut tree = Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: 0,
            by_id: BTreeMap::new(),
            split_tombstones: Vec::new(),
        };
        tree.root = tree.build(root, None, None, &mut Vec::new())?;
        Ok(tree)
    }

    /// Empty tree with a root element of `root_type`.
    pub fn new(root_type: &str, created_at: TimeTicket) -> Self {
        let root = TreeNode::element(TreeNodeId::new(created_at, 0), root_type);
        let mut by_id = BTreeMap::new();
        by_id.insert(root.id, 0);
        Self {
            nodes: vec![root],
            free: Vec::new(),
            root: 0,
            by_id,
            split_tombstones: Vec::new(),
        }
    }

    // ── arena helpers ────────────────────────────────────────────────────

    fn alloc(&mut self, node: TreeNode) -> Result<u32, DocError> {
        if self.by_id.contains_key(&node.id) {
            return Err(DocError::invariant(format!(
                "duplicate tree node {}",
                node.id.to_id_string()
            )));
        }
        let id = node.id;
        let idx = match self.free.pop() {
            Some(idx) => {
                self.nodes[idx as usize] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                (self.nodes.len() - 1) as u32
            }
        };
        self.by_id.insert(id, idx);
        Ok(idx)
    }

    /// Materializes `data` under `parent`. Nodes are tombstoned at
    /// `force_removed` when given, and every new tombstone is reported.
    fn build(
        &mut self,
        data: &TreeNodeData,
        parent: Option<u32>,
        force_removed: Option<TimeTicket>,
        gc: &mut Vec<GcChild>,
    ) -> Result<u32, DocError> {
        let mut node = if data.is_text() {
            TreeNode::text(data.id, data.value.clone().unwrap_or_default())
        } else {
            TreeNode::element(data.id, data.node_type.clone())
        };
        node.attrs = data.attrs.clone();
        node.parent = parent;
        node.ins_prev = data.ins_prev_id;
        node.ins_next = data.ins_next_id;
        node.removed_at = force_removed.or(data.removed_at);
        if force_removed.is_some() {
            gc.push(GcChild::TreeNode(data.id));
        }
        let idx = self.alloc(node)?;
        let mut children = Vec::with_capacity(data.children.len());
        let mut size = 0;
        for child in &data.children {
            let c = self.build(child, Some(idx), force_removed, gc)?;
            if !self.node(c).is_removed() {
                size += self.node(c).padded_size();
            }
            children.push(c);
        }
        let n = &mut self.nodes[idx as usize];
        n.children = children;
        if !n.is_text() {
            n.size = size;
        }
        Ok(idx)
    }

    fn find_floor_node(&self, id: &TreeNodeId) -> Option<u32> {
        let (floor_id, &idx) = self.by_id.range(..=*id).next_back()?;
        (floor_id.created_at == id.created_at).then_some(idx)
    }

    fn child_index(&self, parent: u32, child: u32) -> Result<usize, DocError> {
        self.node(parent)
            .children
            .iter()
            .position(|&c| c == child)
            .ok_or_else(|| DocError::invariant("node missing from its parent"))
    }

    /// Walks up from `node` adding `delta` to every ancestor's size, stopping
    /// after the first removed ancestor.
    fn update_ancestors_size(&mut self, node: u32, delta: isize) {
        let mut parent = self.node(node).parent;
        while let Some(p) = parent {
            let n = &mut self.nodes[p as usize];
            n.size = n.size.saturating_add_signed(delta);
            if n.is_removed() {
                break;
            }
            parent = n.parent;
        }
    }

    /// Tombstones `node`; true when it was alive before.
    fn remove_node(&mut self, node: u32, removed_at: TimeTicket) -> bool {
        if !self.nodes[node as usize].remove(removed_at) {
            return false;
        }
        let padded = self.node(node).padded_size() as isize;
        self.update_ancestors_size(node, -padded);
        true
    }

    fn link_split(&mut self, node: u32, split: u32) {
        let split_id = self.node(split).id;
        let ins_next = self.node(node).ins_next;
        self.nodes[split as usize].ins_prev = Some(self.node(node).id);
        self.nodes[split as usize].ins_next = ins_next;
        self.nodes[node as usize].ins_next = Some(split_id);
        if let Some(next) = ins_next.and_then(|id| self.by_id.get(&id).copied()) {
            self.nodes[next as usize].ins_prev = Some(split_id);
        }
    }

    fn insert_child_after(&mut self, parent: u32, left: u32, child: u32) -> Result<(), DocError> {
        let at = if left == parent {
            0
        } else {
            self.child_index(parent, left)? + 1
        };
        self.nodes[parent as usize].children.insert(at, child);
        self.nodes[child as usize].parent = Some(parent);
        Ok(())
    }

    // ── splitting ────────────────────────────────────────────────────────

    /// Splits text `node` at `offset` characters; no-op at either end.
    fn split_text(&mut self, node: u32, offset: usize) -> Result<Option<u32>, DocError> {
        let n = self.node(node);
        if offset > n.size {
            return Err(DocError::PositionNotFound(format!(
                "offset {offset} beyond text {} of length {}",
                n.id.to_id_string(),
                n.size
            )));
        }
        if offset == 0 || offset == n.size {
            return Ok(None);
        }
        let byte = n
            .value
            .char_indices()
            .nth(offset)
            .map_or(n.value.len(), |(b, _)| b);
        let id = TreeNodeId::new(n.id.created_at, n.id.offset + offset as u32);
        let mut split = TreeNode::text(id, &n.value[byte..]);
        split.removed_at = n.removed_at;
        let parent = n.parent.ok_or_else(|| DocError::invariant("text node without parent"))?;

        let left = &mut self.nodes[node as usize];
        left.value.truncate(byte);
        left.size = offset;
        let removed = split.removed_at.is_some();
        let split = self.alloc(split)?;
        self.link_split(node, split);
        self.insert_child_after(parent, node, split)?;
        if removed {
            self.split_tombstones.push(id);
        }
        Ok(Some(split))
    }

    /// Moves the children of `node` from `offset` (over all children) into a
    /// new sibling element stamped `ticket`. The sibling goes after `node`
    /// and after any sibling created later than `ticket`.
    fn split_element(&mut self, node: u32, offset: usize, ticket: TimeTicket) -> Result<u32, DocError> {
        let parent = self
            .node(node)
            .parent
            .ok_or_else(|| DocError::InvalidArgument("cannot split the tree root".into()))?;
        let n = self.node(node);
        let id = TreeNodeId::new(ticket, 0);
        let mut split = TreeNode::element(id, n.node_type.clone());
        split.attrs = n.attrs.live_copy();
        split.removed_at = n.removed_at;
        let removed = split.removed_at.is_some();

        let moved = self.nodes[node as usize].children.split_off(offset);
        let moved_size: usize = moved
            .iter()
            .filter(|&&c| !self.node(c).is_removed())
            .map(|&c| self.node(c).padded_size())
            .sum();
        self.nodes[node as usize].size -= moved_size;
        split.size = moved_size;
        split.children = moved.clone();
        let split = self.alloc(split)?;
        for c in moved {
            self.nodes[c as usize].parent = Some(split);
        }
        self.link_split(node, split);
        let mut left = node;
        let siblings = &self.node(parent).children;
        let start = siblings.iter().position(|&c| c == node).map_or(siblings.len(), |i| i + 1);
        for &next in &siblings[start..] {
            if !self.node(next).created_at().after(&ticket) {
                break;
            }
            left = next;
        }
        self.insert_child_after(parent, left, split)?;
        if removed {
            self.split_tombstones.push(id);
        } else {
            self.update_ancestors_size(split, 2);
        }
        Ok(split)
    }

    // ── positions ────────────────────────────────────────────────────────

    fn to_tree_node_pair(&self, pos: &TreePos) -> Result<(u32, u32), DocError> {
        let parent = self
            .find_floor_node(&pos.parent_id)
            .ok_or_else(|| DocError::PositionNotFound(pos.parent_id.to_id_string()))?;
        let mut left = self
            .find_floor_node(&pos.left_sibling_id)
            .ok_or_else(|| DocError::PositionNotFound(pos.left_sibling_id.to_id_string()))?;
        let l = self.node(left);
        if pos.left_sibling_id.offset > 0 && pos.left_sibling_id.offset == l.id.offset {
            if let Some(prev) = l.ins_prev.and_then(|id| self.by_id.get(&id).copied()) {
                left = prev;
            }
        }
        Ok((parent, left))
    }

    /// Resolves `pos` to `(parent, left)` handles, splitting text at the
    /// position and skipping siblings inserted concurrently after
    /// `edited_at`.
    fn find_nodes_and_split_text(
        &mut self,
        pos: &TreePos,
        edited_at: &TimeTicket,
    ) -> Result<(u32, u32), DocError> {
        let (parent, mut left) = self.to_tree_node_pair(pos)?;
        let is_left_most = parent == left;
        let real_parent = match self.node(left).parent {
            Some(p) if !is_left_most => p,
            _ => parent,
        };
        if self.node(left).is_text() {
            let offset = pos
                .left_sibling_id
                .offset
                .saturating_sub(self.node(left).id.offset);
            self.split_text(left, offset as usize)?;
        }
        let children = &self.node(real_parent).children;
        let start = if is_left_most {
            0
        } else {
            children
                .iter()
                .position(|&c| c == left)
                .map_or(children.len(), |i| i + 1)
        };
        for &next in &children[start..] {
            if !self.node(next).created_at().after(edited_at) {
                break;
            }
            left = next;
        }
        Ok((real_parent, left))
    }

    /// Removed nodes that open between the gaps `from` and `to`, each given
    /// as `(parent, left)`, in document order.
    fn tombstones_between(&self, from: (u32, u32), to: (u32, u32)) -> Vec<u32> {
        let mut order = Vec::new();
        self.walk_all(self.root, &mut order);
        let gap = |(parent, left): (u32, u32)| {
            order.iter().position(|&(n, closing)| {
                if parent == left {
                    n == parent && !closing
                } else {
                    n == left && (closing || self.node(n).is_text())
                }
            })
        };
        let (Some(start), Some(end)) = (gap(from), gap(to)) else {
            return Vec::new();
        };
        if start >= end {
            return Vec::new();
        }
        order[start + 1..end]
            .iter()
            .filter(|&&(n, closing)| !closing && self.node(n).is_removed())
            .map(|&(n, _)| n)
            .collect()
    }

    /// Opening and closing events of every node under `node`, tombstones
    /// included. Text nodes only open.
    fn walk_all(&self, node: u32, out: &mut Vec<(u32, bool)>) {
        out.push((node, false));
        if self.node(node).is_text() {
            return;
        }
        for &child in &self.node(node).children {
            self.walk_all(child, out);
        }
        out.push((node, true));
    }

    fn to_index_pos(&self, mut parent: u32, left: u32) -> Result<IndexPos, DocError> {
        if self.node(parent).is_removed() {
            let mut child = parent;
            while self.node(parent).is_removed() {
                child = parent;
                parent = self
                    .node(child)
                    .parent
                    .ok_or_else(|| DocError::invariant("removed node without parent"))?;
            }
            let offset = self
                .offset_of(parent, child)
                .ok_or_else(|| DocError::invariant("node missing from its parent"))?;
            return Ok(IndexPos { node: parent, offset });
        }
        if parent == left {
            return Ok(IndexPos {
                node: parent,
                offset: 0,
            });
        }
        let mut offset = self
            .offset_of(parent, left)
            .ok_or_else(|| DocError::invariant("left sibling missing from parent"))?;
        let l = self.node(left);
        if !l.is_removed() {
            if l.is_text() {
                return Ok(IndexPos {
                    node: left,
                    offset: l.padded_size(),
                });
            }
            offset += 1;
        }
        Ok(IndexPos { node: parent, offset })
    }

    fn to_index(&self, parent: u32, left: u32) -> Result<usize, DocError> {
        Ok(self.index_of(self.to_index_pos(parent, left)?))
    }

    /// Id of the gap right after `node`.
    fn end_id(&self, node: u32) -> TreeNodeId {
        let n = self.node(node);
        if n.is_text() {
            TreeNodeId::new(n.id.created_at, n.id.offset + n.size as u32)
        } else {
            n.id
        }
    }

    /// Converts a visible index into an id-based position.
    pub fn find_pos(&self, index: usize) -> Result<TreePos, DocError> {
        let pos = self.find_tree_pos(self.root, index, true)?;
        let n = self.node(pos.node);
        if n.is_text() {
            let parent = n
                .parent
                .ok_or_else(|| DocError::invariant("text node without parent"))?;
            let parent_id = self.node(parent).id;
            if pos.offset > 0 {
                let left = TreeNodeId::new(n.id.created_at, n.id.offset + pos.offset as u32);
                return Ok(TreePos::new(parent_id, left));
            }
            let prev = self
                .node(parent)
                .children
                .iter()
                .take_while(|&&c| c != pos.node)
                .filter(|&&c| !self.node(c).is_removed())
                .last()
                .copied();
            return Ok(match prev {
                Some(prev) => TreePos::new(parent_id, self.end_id(prev)),
                None => TreePos::new(parent_id, parent_id),
            });
        }
        if pos.offset == 0 {
            return Ok(TreePos::new(n.id, n.id));
        }
        let left = self
            .live_children(pos.node)
            .nth(pos.offset - 1)
            .ok_or_else(|| DocError::invariant("child offset out of range"))?;
        Ok(TreePos::new(n.id, self.end_id(left)))
    }

    /// Visible index of `pos` without splitting anything.
    pub fn pos_to_index(&self, pos: &TreePos) -> Result<usize, DocError> {
        let (parent, left) = self.to_tree_node_pair(pos)?;
        let is_left_most = parent == left;
        let l = self.node(left);
        if !is_left_most && l.is_text() && !l.is_removed() {
            let rel = pos.left_sibling_id.offset.saturating_sub(l.id.offset) as usize;
            if rel <= l.size {
                return Ok(self.index_of(IndexPos {
                    node: left,
                    offset: rel,
                }));
            }
        }
        let parent = match l.parent {
            Some(p) if !is_left_most => p,
            _ => parent,
        };
        self.to_index(parent, left)
    }

    pub fn path_to_pos(&self, path: &[usize]) -> Result<TreePos, DocError> {
        self.find_pos(self.path_to_index(path)?)
    }

    // ── editing ──────────────────────────────────────────────────────────

    /// Replaces `range` with `contents`, after splitting `split_level`
    /// ancestors at the left boundary. Split elements take tickets right
    /// after `edited_at`, so the caller must reserve `split_level`
    /// delimiters.
    pub fn edit(
        &mut self,
        range: (&TreePos, &TreePos),
        contents: &[TreeNodeData],
        split_level: u32,
        edited_at: TimeTicket,
        latest_created_at_by_actor: Option<&BTreeMap<ActorId, TimeTicket>>,
    ) -> Result<TreeEdit, DocError> {
        self.split_tombstones.clear();
        let (from_parent, from_left) = self.find_nodes_and_split_text(range.0, &edited_at)?;
        let (to_parent, to_left) = self.find_nodes_and_split_text(range.1, &edited_at)?;
        let from_index = self.to_index(from_parent, from_left)?;
        let to_index = self.to_index(to_parent, to_left)?;
        if from_index > to_index {
            return Err(DocError::InvalidArgument(format!(
                "tree range {from_index}..{to_index} is reversed"
            )));
        }
        let mut depth = 0;
        let mut cursor = from_parent;
        while let Some(p) = self.node(cursor).parent {
            depth += 1;
            cursor = p;
        }
        if split_level > depth {
            return Err(DocError::InvalidArgument(format!(
                "split level {split_level} exceeds depth {depth}"
            )));
        }
        let from_path = self.tree_pos_to_path(self.to_index_pos(from_parent, from_left)?)?;
        let actor = edited_at.actor();

        // collect
        let mut to_remove = Vec::new();
        let mut removing = HashSet::new();
        let mut removed_ranges: Vec<(usize, usize)> = Vec::new();
        let mut to_move = Vec::new();
        let mut created_at_by_actor = BTreeMap::new();
        for token in self.tokens_in(from_index, to_index) {
            let node = self.node(token.node);
            if token.kind == TokenKind::Start && !token.ended {
                to_move.extend(self.live_children(token.node));
            }
            let max = max_created_at(latest_created_at_by_actor, &node.created_at().actor());
            let parent_removed = node.parent.is_some_and(|p| removing.contains(&p));
            if node.can_delete(&max) || parent_removed {
                note_created_at(&mut created_at_by_actor, node.created_at());
                if token.kind != TokenKind::End {
                    to_remove.push(token.node);
                    removing.insert(token.node);
                }
                match removed_ranges.last_mut() {
                    Some(last) if last.1 == token.from => last.1 = token.to,
                    _ => removed_ranges.push((token.from, token.to)),
                }
            }
        }
        let to_restamp: Vec<u32> = self
            .tombstones_between((from_parent, from_left), (to_parent, to_left))
            .into_iter()
            .filter(|&n| {
                let node = self.node(n);
                let max = max_created_at(latest_created_at_by_actor, &node.created_at().actor());
                node.can_restamp(&edited_at, &max)
            })
            .collect();
        let mut changes = Vec::new();
        for (from, to) in removed_ranges.into_iter().rev() {
            if from < to {
                changes.push(TreeChange::content(
                    actor,
                    from,
                    to,
                    self.index_to_path(from)?,
                    self.index_to_path(to)?,
                ));
            }
        }
        let top_level: Vec<u32> = to_remove
            .iter()
            .copied()
            .filter(|&n| self.node(n).parent.map_or(true, |p| !removing.contains(&p)))
            .collect();
        let reversible = split_level == 0
            && to_move.is_empty()
            && !self.node(from_parent).is_removed()
            && top_level.iter().all(|&n| self.node(n).parent == Some(from_parent));
        let removed_data = if reversible {
            top_level.iter().map(|&n| self.live_data(n)).collect()
        } else {
            Vec::new()
        };

        // delete
        let mut gc_children = Vec::new();
        for &node in &to_remove {
            if self.remove_node(node, edited_at) {
                gc_children.push(GcChild::TreeNode(self.node(node).id));
            }
        }
        for node in to_restamp {
            self.nodes[node as usize].remove(edited_at);
        }

        // merge
        for child in to_move {
            if !self.node(child).is_removed() {
                self.move_child(child, from_parent)?;
            }
        }

        // split
        if split_level > 0 {
            let mut tickets = TicketFactory::after(&edited_at);
            let mut parent = from_parent;
            let mut left = from_left;
            for _ in 0..split_level {
                let offset = if left == parent {
                    0
                } else {
                    self.child_index(parent, left)? + 1
                };
                self.split_element(parent, offset, tickets.issue())?;
                left = parent;
                parent = self
                    .node(parent)
                    .parent
                    .ok_or_else(|| DocError::invariant("split ran past the root"))?;
            }
            changes.push(TreeChange::content(
                actor,
                from_index,
                from_index,
                from_path.clone(),
                from_path.clone(),
            ));
        }

        // insert
        let force_removed = self.node(from_parent).is_removed().then_some(edited_at);
        let mut inserted = Vec::new();
        let mut inserted_size = 0;
        let mut left = from_left;
        for content in contents {
            let idx = self.build(content, None, force_removed, &mut gc_children)?;
            self.insert_child_after(from_parent, left, idx)?;
            if !self.node(idx).is_removed() {
                let padded = self.node(idx).padded_size();
                self.update_ancestors_size(idx, padded as isize);
                inserted_size += padded;
                inserted.push(content.clone());
            }
            left = idx;
        }
        if !inserted.is_empty() {
            match changes.last_mut() {
                Some(last) if last.from == from_index => last.contents = inserted,
                _ => {
                    let mut change = TreeChange::content(
                        actor,
                        from_index,
                        from_index,
                        from_path.clone(),
                        from_path,
                    );
                    change.contents = inserted;
                    changes.push(change);
                }
            }
        }

        gc_children.extend(self.split_tombstones.drain(..).map(GcChild::TreeNode));
        Ok(TreeEdit {
            changes,
            gc_children,
            created_at_by_actor,
            reverse: reversible.then_some(TreeReverse {
                from_index,
                inserted_size,
                removed: removed_data,
            }),
            from_index,
            inserted_size: inserted_size + 2 * split_level as usize,
        })
    }

    fn move_child(&mut self, child: u32, new_parent: u32) -> Result<(), DocError> {
        let old_parent = self
            .node(child)
            .parent
            .ok_or_else(|| DocError::invariant("moved node without parent"))?;
        let padded = self.node(child).padded_size() as isize;
        self.update_ancestors_size(child, -padded);
        let at = self.child_index(old_parent, child)?;
        self.nodes[old_parent as usize].children.remove(at);
        self.nodes[new_parent as usize].children.push(child);
        self.nodes[child as usize].parent = Some(new_parent);
        self.update_ancestors_size(child, padded);
        Ok(())
    }

    /// Writes `attributes` (JSON-encoded values) on elements whose start
    /// token lies in `range`.
    pub fn style(
        &mut self,
        range: (&TreePos, &TreePos),
        attributes: &BTreeMap<String, String>,
        edited_at: TimeTicket,
        latest_created_at_by_actor: Option<&BTreeMap<ActorId, TimeTicket>>,
    ) -> Result<TreeStyle, DocError> {
        self.restyle(
            range,
            edited_at,
            latest_created_at_by_actor,
            TreeChangeKind::Style,
            |attrs| {
                let mut previous = BTreeMap::new();
                let mut gc = Vec::new();
                for (key, value) in attributes {
                    let update = attrs.set(key, value, edited_at);
                    if update.applied {
                        previous.insert(key.clone(), update.previous_value().map(str::to_owned));
                        gc.extend(update.gc_nodes);
                    }
                }
                (previous, gc)
            },
        )
    }

    pub fn remove_style(
        &mut self,
        range: (&TreePos, &TreePos),
        keys: &[String],
        edited_at: TimeTicket,
        latest_created_at_by_actor: Option<&BTreeMap<ActorId, TimeTicket>>,
    ) -> Result<TreeStyle, DocError> {
        self.restyle(
            range,
            edited_at,
            latest_created_at_by_actor,
            TreeChangeKind::RemoveStyle,
            |attrs| {
                let mut previous = BTreeMap::new();
                let mut gc = Vec::new();
                for key in keys {
                    let update = attrs.remove(key, edited_at);
                    if update.applied {
                        previous.insert(key.clone(), update.previous_value().map(str::to_owned));
                        gc.extend(update.gc_nodes);
                    }
                }
                (previous, gc)
            },
        )
    }

    fn restyle<F>(
        &mut self,
        range: (&TreePos, &TreePos),
        edited_at: TimeTicket,
        latest: Option<&BTreeMap<ActorId, TimeTicket>>,
        kind: TreeChangeKind,
        mut apply: F,
    ) -> Result<TreeStyle, DocError>
    where
        F: FnMut(&mut Rht) -> (BTreeMap<String, Option<String>>, Vec<RhtNode>),
    {
        self.split_tombstones.clear();
        let (from_parent, from_left) = self.find_nodes_and_split_text(range.0, &edited_at)?;
        let (to_parent, to_left) = self.find_nodes_and_split_text(range.1, &edited_at)?;
        let from_index = self.to_index(from_parent, from_left)?;
        let to_index = self.to_index(to_parent, to_left)?;
        if from_index > to_index {
            return Err(DocError::InvalidArgument(format!(
                "tree range {from_index}..{to_index} is reversed"
            )));
        }

        let mut out = TreeStyle {
            changes: Vec::new(),
            gc_children: self.split_tombstones.drain(..).map(GcChild::TreeNode).collect(),
            created_at_by_actor: BTreeMap::new(),
            styled: Vec::new(),
            from_index,
            to_index,
        };
        let starts: Vec<_> = self
            .tokens_in(from_index, to_index)
            .into_iter()
            .filter(|t| t.kind == TokenKind::Start)
            .collect();
        for token in starts {
            let node = self.node(token.node);
            let max = max_created_at(latest, &node.created_at().actor());
            if !node.can_style(&edited_at, &max) {
                continue;
            }
            let id = node.id;
            note_created_at(&mut out.created_at_by_actor, node.created_at());
            let (previous, gc) = apply(&mut self.nodes[token.node as usize].attrs);
            out.gc_children.extend(gc.into_iter().map(|n| GcChild::TreeAttr {
                node: id,
                key: n.key().to_owned(),
                updated_at: n.updated_at(),
            }));
            if previous.is_empty() {
                continue;
            }
            let mut change = TreeChange::content(
                edited_at.actor(),
                token.from,
                token.to,
                self.index_to_path(token.from)?,
                self.index_to_path(token.to)?,
            );
            change.kind = kind;
            let attrs = &self.node(token.node).attrs;
            match kind {
                TreeChangeKind::RemoveStyle => change.removed_keys = previous.keys().cloned().collect(),
                _ => {
                    change.attributes = previous
                        .keys()
                        .filter_map(|k| attrs.get(k).map(|v| (k.clone(), v.to_owned())))
                        .collect()
                }
            }
            out.changes.push(change);
            out.styled.push(StyledNode { id, previous });
        }
        Ok(out)
    }

    // ── lookups & GC ─────────────────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.node(self.root).size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn root_type(&self) -> &str {
        &self.node(self.root).node_type
    }

    pub fn removed_at(&self, id: &TreeNodeId) -> Option<TimeTicket> {
        self.by_id
            .get(id)
            .and_then(|&idx| self.node(idx).removed_at)
    }

    pub fn attr_removed_at(&self, id: &TreeNodeId, key: &str, updated_at: TimeTicket) -> Option<TimeTicket> {
        let idx = *self.by_id.get(id)?;
        self.node(idx)
            .attrs
            .node(key)
            .filter(|n| n.updated_at() == updated_at)
            .and_then(RhtNode::removed_at)
    }

    /// Detaches tombstone `id` and frees its subtree. Returns the number of
    /// nodes freed.
    pub fn purge_node(&mut self, id: &TreeNodeId) -> usize {
        let Some(&idx) = self.by_id.get(id) else {
            return 0;
        };
        if idx == self.root {
            return 0;
        }
        if !self.node(idx).is_removed() {
            let padded = self.node(idx).padded_size() as isize;
            self.update_ancestors_size(idx, -padded);
        }
        if let Some(parent) = self.node(idx).parent {
            self.nodes[parent as usize].children.retain(|&c| c != idx);
        }
        let (ins_prev, ins_next) = (self.node(idx).ins_prev, self.node(idx).ins_next);
        if let Some(prev) = ins_prev.and_then(|id| self.by_id.get(&id).copied()) {
            self.nodes[prev as usize].ins_next = ins_next;
        }
        if let Some(next) = ins_next.and_then(|id| self.by_id.get(&id).copied()) {
            self.nodes[next as usize].ins_prev = ins_prev;
        }
        let mut freed = 0;
        let mut stack = vec![idx];
        while let Some(n) = stack.pop() {
            let node = std::mem::replace(&mut self.nodes[n as usize], vacant());
            self.by_id.remove(&node.id);
            self.free.push(n);
            stack.extend(node.children);
            freed += 1;
        }
        freed
    }

    pub fn purge_attr(&mut self, id: &TreeNodeId, key: &str, updated_at: TimeTicket) -> bool {
        let Some(&idx) = self.by_id.get(id) else {
            return false;
        };
        let attrs = &mut self.nodes[idx as usize].attrs;
        match attrs.node(key).filter(|n| n.updated_at() == updated_at).cloned() {
            Some(node) => attrs.purge(&node),
            None => false,
        }
    }

    /// Every node and attribute tombstone, used to rebuild GC bookkeeping.
    pub fn tombstones(&self) -> Vec<GcChild> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(idx) = stack.pop() {
            let n = self.node(idx);
            if n.is_removed() {
                out.push(GcChild::TreeNode(n.id));
            }
            out.extend(n.attrs.nodes().filter(|a| a.is_removed()).map(|a| GcChild::TreeAttr {
                node: n.id,
                key: a.key().to_owned(),
                updated_at: a.updated_at(),
            }));
            stack.extend(n.children.iter().rev());
        }
        out
    }

    // ── conversions ──────────────────────────────────────────────────────

    fn data_of(&self, idx: u32, live_only: bool) -> TreeNodeData {
        let n = self.node(idx);
        TreeNodeData {
            id: n.id,
            node_type: n.node_type.clone(),
            value: n.is_text().then(|| n.value.clone()),
            attrs: n.attrs.clone(),
            children: n
                .children
                .iter()
                .filter(|&&c| !live_only || !self.node(c).is_removed())
                .map(|&c| self.data_of(c, live_only))
                .collect(),
            removed_at: n.removed_at,
            ins_prev_id: n.ins_prev,
            ins_next_id: n.ins_next,
        }
    }

    fn live_data(&self, idx: u32) -> TreeNodeData {
        self.data_of(idx, true)
    }

    /// Whole tree including tombstones.
    pub fn to_data(&self) -> TreeNodeData {
        self.data_of(self.root, false)
    }

    /// Fresh copy of the live nodes with new tickets.
    pub fn restamped(&self, tickets: &mut TicketFactory) -> Result<CrdtTree, DocError> {
        CrdtTree::from_data(&self.live_data(self.root).restamped(tickets))
    }

    pub fn to_json_value(&self) -> Value {
        self.node_json(self.root)
    }

    fn node_json(&self, idx: u32) -> Value {
        let n = self.node(idx);
        let mut map = Map::new();
        map.insert("type".to_owned(), Value::String(n.node_type.clone()));
        if n.is_text() {
            map.insert("value".to_owned(), Value::String(n.value.clone()));
            return Value::Object(map);
        }
        let children = self.live_children(idx).map(|c| self.node_json(c)).collect();
        map.insert("children".to_owned(), Value::Array(children));
        if !n.attrs.is_empty() {
            map.insert("attributes".to_owned(), n.attrs.to_json_value());
        }
        Value::Object(map)
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(self.root, &mut out);
        out
    }

    fn write_xml(&self, idx: u32, out: &mut String) {
        let n = self.node(idx);
        if n.is_text() {
            out.push_str(&n.value.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;"));
            return;
        }
        out.push('<');
        out.push_str(&n.node_type);
        out.push_str(&n.attrs.to_xml());
        out.push('>');
        for child in self.live_children(idx) {
            self.write_xml(child, out);
        }
        out.push_str("</");
        out.push_str(&n.node_type);
        out.push('>');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn actor(n: u8) -> ActorId {
        let mut bytes = [0u8; 12];
        bytes[11] = n;
        ActorId::new(bytes)
    }

    fn t(lamport: u64, a: u8) -> TimeTicket {
        TimeTicket::new(lamport, 0, actor(a))
    }

    /// `<r><p>ab</p><p>cd</p></r>`
    fn sample() -> CrdtTree {
        let mut tickets = TicketFactory::new(1, actor(1), 0);
        let data = TreeNodeSpec::element("r")
            .with_children(vec![
                TreeNodeSpec::element("p").with_children(vec![TreeNodeSpec::text("ab")]),
                TreeNodeSpec::element("p").with_children(vec![TreeNodeSpec::text("cd")]),
            ])
            .to_data(&mut tickets);
        CrdtTree::from_data(&data).unwrap()
    }

    fn edit(tree: &mut CrdtTree, from: usize, to: usize, contents: Vec<TreeNodeSpec>, at: TimeTicket) -> TreeEdit {
        let from_pos = tree.find_pos(from).unwrap();
        let to_pos = tree.find_pos(to).unwrap();
        let mut tickets = TicketFactory::after(&at);
        let data: Vec<_> = contents.iter().map(|c| c.to_data(&mut tickets)).collect();
        let at = tickets.issue();
        tree.edit((&from_pos, &to_pos), &data, 0, at, None).unwrap()
    }

    #[test]
    fn sizes_and_rendering() {
        let tree = sample();
        assert_eq!(tree.len(), 8);
        assert_eq!(tree.to_xml(), "<r><p>ab</p><p>cd</p></r>");
        assert_eq!(
            tree.to_json_value(),
            json!({"type": "r", "children": [
                {"type": "p", "children": [{"type": "text", "value": "ab"}]},
                {"type": "p", "children": [{"type": "text", "value": "cd"}]},
            ]})
        );
    }

    #[test]
    fn index_path_round_trip() {
        let tree = sample();
        for i in 0..=tree.len() {
            let path = tree.index_to_path(i).unwrap();
            assert_eq!(tree.path_to_index(&path).unwrap(), i, "path {path:?}");
        }
        assert_eq!(tree.index_to_path(0).unwrap(), vec![0]);
        assert_eq!(tree.index_to_path(2).unwrap(), vec![0, 1]);
        assert_eq!(tree.index_to_path(4).unwrap(), vec![1]);
        assert_eq!(tree.index_to_path(6).unwrap(), vec![1, 1]);
    }

    #[test]
    fn nodes_between_visits_overlapping_nodes() {
        let tree = sample();
        let nodes = tree.nodes_between(2, 6).unwrap();
        let summary: Vec<_> = nodes
            .iter()
            .map(|n| n.value.clone().unwrap_or_else(|| n.node_type.clone()))
            .collect();
        assert_eq!(summary, vec!["ab", "p", "p", "cd"]);
    }

    #[test]
    fn tokens_between_reports_boundaries() {
        let tree = sample();
        let kinds: Vec<_> = tree
            .tokens_between(2, 6)
            .unwrap()
            .into_iter()
            .map(|t| (t.kind, t.node.node_type))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (TokenKind::Text, TEXT_TYPE.to_string()),
                (TokenKind::End, "p".to_string()),
                (TokenKind::Start, "p".to_string()),
                (TokenKind::Text, TEXT_TYPE.to_string()),
            ]
        );
        assert!(tree.tokens_between(3, 2).is_err());
    }

    #[test]
    fn insert_text_inside_paragraph() {
        let mut tree = sample();
        edit(&mut tree, 2, 2, vec![TreeNodeSpec::text("X")], t(2, 1));
        assert_eq!(tree.to_xml(), "<r><p>aXb</p><p>cd</p></r>");
        assert_eq!(tree.len(), 9);
    }

    #[test]
    fn delete_across_paragraphs_merges() {
        let mut tree = sample();
        let result = edit(&mut tree, 2, 6, vec![], t(2, 1));
        assert_eq!(tree.to_xml(), "<r><p>ad</p></r>");
        assert!(result.reverse.is_none());
        assert_eq!(result.changes.len(), 1);
        assert_eq!((result.changes[0].from, result.changes[0].to), (2, 6));
    }

    #[test]
    fn delete_whole_paragraph_is_reversible() {
        let mut tree = sample();
        let result = edit(&mut tree, 4, 8, vec![], t(2, 1));
        assert_eq!(tree.to_xml(), "<r><p>ab</p></r>");
        let reverse = result.reverse.unwrap();
        assert_eq!(reverse.from_index, 4);
        assert_eq!(reverse.inserted_size, 0);
        assert_eq!(reverse.removed.len(), 1);
        assert_eq!(reverse.removed[0].padded_size(), 4);
        assert_eq!(result.gc_children.len(), 2);
    }

    #[test]
    fn split_paragraph() {
        let mut tree = sample();
        let pos = tree.find_pos(2).unwrap();
        let at = t(2, 1);
        let result = tree.edit((&pos, &pos), &[], 1, at, None).unwrap();
        assert_eq!(tree.to_xml(), "<r><p>a</p><p>b</p><p>cd</p></r>");
        assert_eq!(tree.len(), 10);
        assert!(result.reverse.is_none());
    }

    #[test]
    fn concurrent_inserts_converge() {
        let mut a = sample();
        let mut b = sample();
        let pos = a.find_pos(1).unwrap();
        let x = vec![TreeNodeSpec::text("x").to_data(&mut TicketFactory::new(5, actor(1), 0))];
        let y = vec![TreeNodeSpec::text("y").to_data(&mut TicketFactory::new(5, actor(2), 0))];
        let tx = TimeTicket::new(5, 2, actor(1));
        let ty = TimeTicket::new(5, 2, actor(2));

        a.edit((&pos, &pos), &x, 0, tx, None).unwrap();
        a.edit((&pos, &pos), &y, 0, ty, Some(&BTreeMap::new())).unwrap();
        b.edit((&pos, &pos), &y, 0, ty, None).unwrap();
        b.edit((&pos, &pos), &x, 0, tx, Some(&BTreeMap::new())).unwrap();
        assert_eq!(a.to_xml(), b.to_xml());
        assert_eq!(a.to_xml(), "<r><p>yxab</p><p>cd</p></r>");
    }

    #[test]
    fn style_and_remove_style() {
        let mut tree = sample();
        let from = tree.find_pos(0).unwrap();
        let to = tree.find_pos(1).unwrap();
        let mut attrs = BTreeMap::new();
        attrs.insert("bold".to_owned(), "true".to_owned());
        let styled = tree.style((&from, &to), &attrs, t(2, 1), None).unwrap();
        assert_eq!(styled.styled.len(), 1);
        assert_eq!(tree.to_xml(), "<r><p bold=\"true\">ab</p><p>cd</p></r>");

        let removed = tree
            .remove_style((&from, &to), &["bold".to_owned()], t(3, 1), None)
            .unwrap();
        assert_eq!(removed.gc_children.len(), 1);
        assert_eq!(tree.to_xml(), "<r><p>ab</p><p>cd</p></r>");
    }

    #[test]
    fn purge_frees_subtree() {
        let mut tree = sample();
        let result = edit(&mut tree, 4, 8, vec![], t(2, 1));
        let GcChild::TreeNode(p) = result.gc_children[0] else {
            panic!("expected a tree node");
        };
        assert_eq!(tree.purge_node(&p), 2);
        assert_eq!(tree.purge_node(&p), 0);
        assert_eq!(tree.to_data().children.len(), 1);
    }

    #[test]
    fn snapshot_round_trip_keeps_tombstones() {
        let mut tree = sample();
        edit(&mut tree, 1, 2, vec![], t(2, 1));
        let copy = CrdtTree::from_data(&tree.to_data()).unwrap();
        assert_eq!(copy.to_xml(), "<r><p>b</p><p>cd</p></r>");
        assert_eq!(copy.tombstones().len(), 1);
        assert_eq!(copy.len(), tree.len());
    }
}
