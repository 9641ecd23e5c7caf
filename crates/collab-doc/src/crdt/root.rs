//! The document root and its element registry.
//!
//! Elements are owned by their containers. The registry only records, for
//! every element that has not been purged, the creation ticket of its
//! parent; an element is reached by walking that chain up to the root and
//! descending again. Removed elements and removed fragments inside text and
//! tree elements are tracked separately until garbage collection reclaims
//! them.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde_json::Value;

use super::rga_tree_split::SplitNodeId;
use super::tree::TreeNodeId;
use super::{CrdtElement, CrdtObject, ElementValue, Traverse};
use crate::clock::TimeTicket;
use crate::error::DocError;

/// A collectable piece inside a text or tree element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GcChild {
    TextNode(SplitNodeId),
    TextAttr {
        node: SplitNodeId,
        key: String,
        updated_at: TimeTicket,
    },
    TreeNode(TreeNodeId),
    TreeAttr {
        node: TreeNodeId,
        key: String,
        updated_at: TimeTicket,
    },
}

/// One step of a `$.a.b[2]` path.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    Key(String),
    Index(usize),
}

fn parse_path(path: &str) -> Result<Vec<PathSegment>, DocError> {
    let invalid = || DocError::InvalidArgument(format!("invalid path: {path}"));
    let mut rest = path.strip_prefix('$').ok_or_else(invalid)?;
    let mut segments = Vec::new();
    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix('.') {
            let end = tail.find(['.', '[']).unwrap_or(tail.len());
            if end == 0 {
                return Err(invalid());
            }
            segments.push(PathSegment::Key(tail[..end].to_owned()));
            rest = &tail[end..];
        } else if let Some(tail) = rest.strip_prefix('[') {
            let end = tail.find(']').ok_or_else(invalid)?;
            let index = tail[..end].parse().map_err(|_| invalid())?;
            segments.push(PathSegment::Index(index));
            rest = &tail[end + 1..];
        } else {
            return Err(invalid());
        }
    }
    Ok(segments)
}

#[derive(Debug, Clone)]
pub struct CrdtRoot {
    root: CrdtElement,
    /// created_at → parent created_at; `None` for the root itself.
    parents: HashMap<TimeTicket, Option<TimeTicket>>,
    removed: BTreeSet<TimeTicket>,
    /// Collectable piece → created_at of the text or tree holding it.
    gc_pairs: BTreeMap<GcChild, TimeTicket>,
}

impl Default for CrdtRoot {
    fn default() -> Self {
        Self::new()
    }
}

impl CrdtRoot {
    pub fn new() -> Self {
        let root = CrdtElement::object(CrdtObject::new(), TimeTicket::INITIAL);
        let mut parents = HashMap::new();
        parents.insert(root.created_at(), None);
        Self {
            root,
            parents,
            removed: BTreeSet::new(),
            gc_pairs: BTreeMap::new(),
        }
    }

    /// Rebuilds the registry for a root restored from a snapshot.
    pub fn from_element(root: CrdtElement) -> Result<Self, DocError> {
        if root.as_object().is_none() {
            return Err(DocError::InvalidArgument("document root must be an object".into()));
        }
        let mut out = Self {
            parents: HashMap::new(),
            removed: BTreeSet::new(),
            gc_pairs: BTreeMap::new(),
            root,
        };
        let root_at = out.root.created_at();
        out.parents.insert(root_at, None);
        let (entries, gc) = Self::collect_subtree(&out.root, None);
        for (created_at, parent, removed) in entries.into_iter().skip(1) {
            out.parents.insert(created_at, parent);
            if removed {
                out.removed.insert(created_at);
            }
        }
        out.gc_pairs.extend(gc);
        Ok(out)
    }

    /// `(created_at, parent, removed)` for `element` and everything nested
    /// in it, plus the collectable pieces inside its text and tree elements.
    #[allow(clippy::type_complexity)]
    fn collect_subtree(
        element: &CrdtElement,
        parent: Option<TimeTicket>,
    ) -> (Vec<(TimeTicket, Option<TimeTicket>, bool)>, Vec<(GcChild, TimeTicket)>) {
        let mut entries = vec![(element.created_at(), parent, element.is_removed())];
        let mut gc = Vec::new();
        sequence_tombstones(element, &mut gc);
        element.descendants(&mut |e: &CrdtElement, p: &CrdtElement| {
            entries.push((e.created_at(), Some(p.created_at()), e.is_removed()));
            sequence_tombstones(e, &mut gc);
            Traverse::Continue
        });
        (entries, gc)
    }

    pub fn root(&self) -> &CrdtElement {
        &self.root
    }

    pub fn root_object(&self) -> &CrdtObject {
        match &self.root.value {
            ElementValue::Object(o) => o,
            _ => unreachable!("root is always an object"),
        }
    }

    // ── lookup ───────────────────────────────────────────────────────────

    /// Creation tickets from the root's child down to `created_at`.
    fn chain(&self, created_at: &TimeTicket) -> Option<Vec<TimeTicket>> {
        let mut chain = Vec::new();
        let mut current = *created_at;
        while let Some(parent) = *self.parents.get(&current)? {
            chain.push(current);
            current = parent;
        }
        if current != self.root.created_at() {
            return None;
        }
        chain.reverse();
        Some(chain)
    }

    pub fn find(&self, created_at: &TimeTicket) -> Option<&CrdtElement> {
        let mut element = &self.root;
        for step in self.chain(created_at)? {
            element = element.child(&step)?;
        }
        Some(element)
    }

    pub fn find_mut(&mut self, created_at: &TimeTicket) -> Option<&mut CrdtElement> {
        let chain = self.chain(created_at)?;
        let mut element = &mut self.root;
        for step in chain {
            element = element.child_mut(&step)?;
        }
        Some(element)
    }

    pub fn parent_of(&self, created_at: &TimeTicket) -> Option<TimeTicket> {
        self.parents.get(created_at).copied().flatten()
    }

    pub fn is_registered(&self, created_at: &TimeTicket) -> bool {
        self.parents.contains_key(created_at)
    }

    /// `$`-rooted path of a registered element, e.g. `$.todos[2].title`.
    pub fn create_path(&self, created_at: &TimeTicket) -> Result<String, DocError> {
        let chain = self
            .chain(created_at)
            .ok_or_else(|| DocError::not_found(*created_at))?;
        let mut path = String::from("$");
        let mut parent = &self.root;
        for step in chain {
            let segment = parent
                .sub_path_of(&step)
                .ok_or_else(|| DocError::not_found(step))?;
            if parent.as_array().is_some() {
                path.push_str(&format!("[{segment}]"));
            } else {
                path.push('.');
                path.push_str(&segment);
            }
            parent = parent.child(&step).ok_or_else(|| DocError::not_found(step))?;
        }
        Ok(path)
    }

    /// Live element at `path`.
    pub fn find_by_path(&self, path: &str) -> Result<Option<&CrdtElement>, DocError> {
        let mut element = &self.root;
        for segment in parse_path(path)? {
            let next = match (&segment, &element.value) {
                (PathSegment::Key(key), ElementValue::Object(o)) => o.get(key),
                (PathSegment::Index(i), ElementValue::Array(a)) => a.element_at(*i),
                _ => None,
            };
            match next {
                Some(e) => element = e,
                None => return Ok(None),
            }
        }
        Ok(Some(element))
    }

    // ── registry ─────────────────────────────────────────────────────────

    /// Registers the child `created_at` of `parent` and everything nested in
    /// it. The element must already be attached to its parent.
    pub fn register_element(&mut self, parent: TimeTicket, created_at: TimeTicket) -> Result<(), DocError> {
        let element = self
            .find(&parent)
            .and_then(|p| p.child(&created_at))
            .ok_or_else(|| DocError::not_found(created_at))?;
        let (entries, gc) = Self::collect_subtree(element, Some(parent));
        for (ct, p, removed) in entries {
            self.parents.insert(ct, p);
            if removed {
                self.removed.insert(ct);
            }
        }
        self.gc_pairs.extend(gc);
        Ok(())
    }

    /// Drops `created_at` and its descendants from the registry. Returns
    /// how many elements were dropped.
    pub fn deregister_element(&mut self, created_at: &TimeTicket) -> usize {
        let Some(element) = self.find(created_at) else {
            return 0;
        };
        let (entries, _) = Self::collect_subtree(element, None);
        let dropped: HashSet<TimeTicket> = entries.into_iter().map(|(ct, _, _)| ct).collect();
        for ct in &dropped {
            self.parents.remove(ct);
            self.removed.remove(ct);
        }
        self.gc_pairs.retain(|_, owner| !dropped.contains(owner));
        dropped.len()
    }

    pub fn register_removed_element(&mut self, created_at: TimeTicket) {
        self.removed.insert(created_at);
    }

    /// Registers a collectable piece of the text or tree `parent`. A piece
    /// registered twice is unregistered: a tombstone replaced by a newer
    /// write is no longer garbage.
    pub fn register_gc_pair(&mut self, child: GcChild, parent: TimeTicket) {
        if self.gc_pairs.remove(&child).is_none() {
            self.gc_pairs.insert(child, parent);
        }
    }

    pub fn element_map_len(&self) -> usize {
        self.parents.len()
    }

    pub fn removed_element_len(&self) -> usize {
        self.removed.len()
    }

    pub fn gc_pair_len(&self) -> usize {
        self.gc_pairs.len()
    }

    /// Number of registered elements and pieces awaiting collection.
    pub fn garbage_len(&self) -> usize {
        let mut seen = HashSet::new();
        for created_at in &self.removed {
            let Some(element) = self.find(created_at) else {
                continue;
            };
            let (entries, _) = Self::collect_subtree(element, None);
            seen.extend(entries.into_iter().map(|(ct, _, _)| ct));
        }
        seen.len() + self.gc_pairs.len()
    }

    // ── garbage collection ───────────────────────────────────────────────

    /// Purges every element and piece removed at or before `safe`. Returns
    /// the number of purged elements and pieces; a second call with the same
    /// ticket returns 0.
    pub fn garbage_collect(&mut self, safe: &TimeTicket) -> usize {
        let mut count = 0;
        let candidates: Vec<TimeTicket> = self
            .removed
            .iter()
            .copied()
            .filter(|ct| {
                self.find(ct)
                    .and_then(CrdtElement::removed_at)
                    .is_some_and(|r| !r.after(safe))
            })
            .collect();
        for created_at in candidates {
            let Some(parent) = self.parent_of(&created_at) else {
                continue;
            };
            count += self.deregister_element(&created_at);
            if let Some(parent) = self.find_mut(&parent) {
                parent.purge_child(&created_at);
            }
        }

        let pairs: Vec<(GcChild, TimeTicket)> = self
            .gc_pairs
            .iter()
            .map(|(child, parent)| (child.clone(), *parent))
            .collect();
        for (child, parent) in pairs {
            let Some(owner) = self.find_mut(&parent) else {
                self.gc_pairs.remove(&child);
                continue;
            };
            match piece_removed_at(owner, &child) {
                None => {
                    self.gc_pairs.remove(&child);
                }
                Some(removed_at) if !removed_at.after(safe) => {
                    count += purge_piece(owner, &child);
                    self.gc_pairs.remove(&child);
                }
                Some(_) => {}
            }
        }
        tracing::debug!(purged = count, safe = %safe, "garbage collected");
        count
    }

    // ── projections ──────────────────────────────────────────────────────

    pub fn to_json_value(&self) -> Value {
        self.root.to_json_value(false)
    }

    pub fn to_json(&self) -> String {
        self.root.to_json_value(false).to_string()
    }

    /// Key-sorted JSON; byte-identical on converged replicas.
    pub fn to_sorted_json(&self) -> String {
        self.root.to_json_value(true).to_string()
    }
}

fn sequence_tombstones(element: &CrdtElement, out: &mut Vec<(GcChild, TimeTicket)>) {
    let owner = element.created_at();
    match &element.value {
        ElementValue::Text(text) => {
            out.extend(
                text.rga()
                    .blocks()
                    .filter(|(_, _, removed_at)| removed_at.is_some())
                    .map(|(id, _, _)| (GcChild::TextNode(id), owner)),
            );
            out.extend(text.attr_tombstones().into_iter().map(|c| (c, owner)));
        }
        ElementValue::Tree(tree) => {
            out.extend(tree.tombstones().into_iter().map(|c| (c, owner)));
        }
        _ => {}
    }
}

fn piece_removed_at(owner: &CrdtElement, child: &GcChild) -> Option<TimeTicket> {
    match (&owner.value, child) {
        (ElementValue::Text(text), GcChild::TextNode(id)) => text.removed_at(id),
        (ElementValue::Text(text), GcChild::TextAttr { node, key, updated_at }) => text
            .rga()
            .value_by_id(node)
            .and_then(|v| v.attrs().node(key))
            .filter(|n| n.updated_at() == *updated_at)
            .and_then(|n| n.removed_at()),
        (ElementValue::Tree(tree), GcChild::TreeNode(id)) => tree.removed_at(id),
        (ElementValue::Tree(tree), GcChild::TreeAttr { node, key, updated_at }) => {
            tree.attr_removed_at(node, key, *updated_at)
        }
        _ => None,
    }
}

fn purge_piece(owner: &mut CrdtElement, child: &GcChild) -> usize {
    match (&mut owner.value, child) {
        (ElementValue::Text(text), GcChild::TextNode(id)) => usize::from(text.purge_node(id)),
        (ElementValue::Text(text), GcChild::TextAttr { node, key, updated_at }) => {
            usize::from(text.purge_attr(node, key, *updated_at))
        }
        (ElementValue::Tree(tree), GcChild::TreeNode(id)) => tree.purge_node(id),
        (ElementValue::Tree(tree), GcChild::TreeAttr { node, key, updated_at }) => {
            usize::from(tree.purge_attr(node, key, *updated_at))
        }
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ActorId;
    use crate::crdt::{CrdtArray, PrimitiveValue};

    fn t(lamport: u64) -> TimeTicket {
        TimeTicket::new(lamport, 0, ActorId::INITIAL)
    }

    fn set(root: &mut CrdtRoot, parent: TimeTicket, key: &str, element: CrdtElement) {
        let created_at = element.created_at();
        let object = root.find_mut(&parent).unwrap().as_object_mut().unwrap();
        if let Some(removed) = object.set(key, element, created_at) {
            root.register_removed_element(removed);
        }
        root.register_element(parent, created_at).unwrap();
    }

    fn sample() -> CrdtRoot {
        let mut root = CrdtRoot::new();
        set(&mut root, TimeTicket::INITIAL, "todos", CrdtElement::array(CrdtArray::new(), t(1)));
        for (i, title) in ["a", "b", "c"].into_iter().enumerate() {
            let at = t(2 + i as u64);
            let list = root.find_mut(&t(1)).unwrap().as_array_mut().unwrap();
            list.push(CrdtElement::primitive(title.into(), at)).unwrap();
            root.register_element(t(1), at).unwrap();
        }
        root
    }

    #[test]
    fn paths_round_trip() {
        let root = sample();
        assert_eq!(root.create_path(&t(1)).unwrap(), "$.todos");
        assert_eq!(root.create_path(&t(3)).unwrap(), "$.todos[1]");
        let found = root.find_by_path("$.todos[1]").unwrap().unwrap();
        assert_eq!(found.as_primitive(), Some(&PrimitiveValue::String("b".into())));
        assert!(root.find_by_path("$.missing").unwrap().is_none());
        assert!(root.find_by_path("todos").is_err());
    }

    #[test]
    fn gc_purges_removed_elements_once() {
        let mut root = sample();
        let list = root.find_mut(&t(1)).unwrap().as_array_mut().unwrap();
        list.delete(&t(3), t(10)).unwrap();
        root.register_removed_element(t(3));
        assert_eq!(root.garbage_len(), 1);
        assert_eq!(root.element_map_len(), 5);

        assert_eq!(root.garbage_collect(&t(9)), 0);
        assert_eq!(root.garbage_collect(&t(10)), 1);
        assert_eq!(root.garbage_collect(&t(10)), 0);
        assert_eq!(root.element_map_len(), 4);
        assert!(root.find(&t(3)).is_none());
        assert_eq!(root.to_json(), r#"{"todos":["a","c"]}"#);
    }

    #[test]
    fn removing_a_container_collects_its_subtree() {
        let mut root = sample();
        let removed = root
            .find_mut(&TimeTicket::INITIAL)
            .unwrap()
            .as_object_mut()
            .unwrap()
            .delete_by_key("todos", t(10));
        assert_eq!(removed, Some(t(1)));
        root.register_removed_element(t(1));
        assert_eq!(root.garbage_len(), 4);
        assert_eq!(root.garbage_collect(&TimeTicket::MAX), 4);
        assert_eq!(root.element_map_len(), 1);
    }

    #[test]
    fn gc_pair_registration_toggles() {
        let mut root = CrdtRoot::new();
        let piece = GcChild::TextNode(SplitNodeId::new(t(4), 0));
        root.register_gc_pair(piece.clone(), t(1));
        assert_eq!(root.gc_pair_len(), 1);
        root.register_gc_pair(piece, t(1));
        assert_eq!(root.gc_pair_len(), 0);
    }

    #[test]
    fn rebuilds_registry_from_snapshot() {
        let root = sample();
        let copy = CrdtRoot::from_element(root.root().clone()).unwrap();
        assert_eq!(copy.element_map_len(), root.element_map_len());
        assert_eq!(copy.create_path(&t(4)).unwrap(), "$.todos[2]");
    }
}
