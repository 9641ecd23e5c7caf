//! RGATreeList: the replicated sequence behind arrays.
//!
//! Nodes live in an arena and are addressed by stable `u32` handles. They
//! are linked in document order behind a dummy head and threaded through a
//! splay rank tree where a live node weighs 1 and a tombstone 0, which gives
//! logarithmic index lookups. A second map resolves creation tickets to
//! handles. Purged slots go to a free list and are reused.

use std::collections::HashMap;

use splay_forest::types::{Node, WeightedNode};

use super::{CrdtElement, PrimitiveValue};
use crate::clock::TimeTicket;
use crate::error::DocError;

// ── ListNode ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct ListNode {
    value: CrdtElement,
    prev: Option<u32>,
    next: Option<u32>,
    p: Option<u32>,
    l: Option<u32>,
    r: Option<u32>,
    weight: usize,
}

impl ListNode {
    fn new(value: CrdtElement) -> Self {
        let weight = usize::from(!value.is_removed());
        Self {
            value,
            prev: None,
            next: None,
            p: None,
            l: None,
            r: None,
            weight,
        }
    }
}

impl Node for ListNode {
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

impl WeightedNode for ListNode {
    fn len(&self) -> usize {
        usize::from(!self.value.is_removed())
    }
    fn weight(&self) -> usize {
        self.weight
    }
    fn set_weight(&mut self, weight: usize) {
        self.weight = weight;
    }
}

/// Placeholder stored in the dummy head and in freed slots.
fn placeholder() -> CrdtElement {
    let mut value = CrdtElement::primitive(PrimitiveValue::Null, TimeTicket::INITIAL);
    value.meta.removed_at = Some(TimeTicket::INITIAL);
    value
}

// ── RgaTreeList ───────────────────────────────────────────────────────────

const HEAD: u32 = 0;

#[derive(Debug, Clone)]
pub struct RgaTreeList {
    nodes: Vec<ListNode>,
    free: Vec<u32>,
    last: u32,
    root: Option<u32>,
    by_created_at: HashMap<TimeTicket, u32>,
}

impl Default for RgaTreeList {
    fn default() -> Self {
        Self::new()
    }
}

impl RgaTreeList {
    pub fn new() -> Self {
        let mut nodes = vec![ListNode::new(placeholder())];
        let root = splay_forest::insert_after(&mut nodes, None, None, HEAD);
        let mut by_created_at = HashMap::new();
        by_created_at.insert(TimeTicket::INITIAL, HEAD);
        Self {
            nodes,
            free: Vec::new(),
            last: HEAD,
            root,
            by_created_at,
        }
    }

    fn handle(&self, created_at: &TimeTicket) -> Result<u32, DocError> {
        self.by_created_at
            .get(created_at)
            .copied()
            .ok_or(DocError::ElementNotFound(*created_at))
    }

    fn alloc(&mut self, value: CrdtElement) -> u32 {
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx as usize] = ListNode::new(value);
                idx
            }
            None => {
                self.nodes.push(ListNode::new(value));
                (self.nodes.len() - 1) as u32
            }
        }
    }

    /// Starting at `created_at`, skips over following nodes positioned
    /// after `executed_at`: they were inserted concurrently by writers that
    /// win the tie, so the new node goes behind them.
    fn find_next_before_executed_at(
        &self,
        created_at: &TimeTicket,
        executed_at: &TimeTicket,
    ) -> Result<u32, DocError> {
        let mut node = self.handle(created_at)?;
        while let Some(next) = self.nodes[node as usize].next {
            if self.nodes[next as usize]
                .value
                .positioned_at()
                .after(executed_at)
            {
                node = next;
            } else {
                break;
            }
        }
        Ok(node)
    }

    fn link_after(&mut self, prev: u32, idx: u32) {
        let next = self.nodes[prev as usize].next;
        self.nodes[idx as usize].prev = Some(prev);
        self.nodes[idx as usize].next = next;
        self.nodes[prev as usize].next = Some(idx);
        match next {
            Some(n) => self.nodes[n as usize].prev = Some(idx),
            None => self.last = idx,
        }
        self.root = splay_forest::insert_after(&mut self.nodes, self.root, Some(prev), idx);
    }

    fn unlink(&mut self, idx: u32) {
        let ListNode { prev, next, .. } = self.nodes[idx as usize];
        if let Some(p) = prev {
            self.nodes[p as usize].next = next;
        }
        match next {
            Some(n) => self.nodes[n as usize].prev = prev,
            None => self.last = prev.unwrap_or(HEAD),
        }
        self.nodes[idx as usize].prev = None;
        self.nodes[idx as usize].next = None;
        self.root = splay_forest::remove(&mut self.nodes, self.root, idx);
    }

    /// Appends at the end, as if executed at the element's creation.
    pub fn push(&mut self, value: CrdtElement) -> Result<(), DocError> {
        let last = self.last_created_at();
        let executed_at = value.created_at();
        self.insert_after(&last, value, executed_at)
    }

    pub fn insert_after(
        &mut self,
        prev_created_at: &TimeTicket,
        value: CrdtElement,
        executed_at: TimeTicket,
    ) -> Result<(), DocError> {
        let prev = self.find_next_before_executed_at(prev_created_at, &executed_at)?;
        let created_at = value.created_at();
        let idx = self.alloc(value);
        self.link_after(prev, idx);
        self.by_created_at.insert(created_at, idx);
        Ok(())
    }

    /// Moves `created_at` behind `prev_created_at`. Applies only when
    /// `executed_at` is after the element's last move; returns whether it
    /// moved.
    pub fn move_after(
        &mut self,
        prev_created_at: &TimeTicket,
        created_at: &TimeTicket,
        executed_at: TimeTicket,
    ) -> Result<bool, DocError> {
        let idx = self.handle(created_at)?;
        self.handle(prev_created_at)?;
        if prev_created_at == created_at {
            return Ok(false);
        }
        let moved_at = self.nodes[idx as usize].value.moved_at();
        if moved_at.is_some_and(|m| !executed_at.after(&m)) {
            return Ok(false);
        }
        self.unlink(idx);
        let prev = self.find_next_before_executed_at(prev_created_at, &executed_at)?;
        self.link_after(prev, idx);
        self.nodes[idx as usize].value.set_moved_at(executed_at);
        Ok(true)
    }

    pub fn get(&self, created_at: &TimeTicket) -> Option<&CrdtElement> {
        let idx = *self.by_created_at.get(created_at)?;
        (idx != HEAD).then(|| &self.nodes[idx as usize].value)
    }

    pub fn get_mut(&mut self, created_at: &TimeTicket) -> Option<&mut CrdtElement> {
        let idx = *self.by_created_at.get(created_at)?;
        (idx != HEAD).then(|| &mut self.nodes[idx as usize].value)
    }

    fn handle_by_index(&mut self, index: usize) -> Option<u32> {
        let (idx, _) = splay_forest::find(&mut self.nodes, &mut self.root, index + 1)?;
        Some(idx)
    }

    /// Live element at `index`, splayed to the root of the index.
    pub fn get_by_index(&mut self, index: usize) -> Option<&CrdtElement> {
        let idx = self.handle_by_index(index)?;
        Some(&self.nodes[idx as usize].value)
    }

    /// Live element at `index` under a shared borrow; the index keeps its
    /// shape.
    pub fn element_at(&self, index: usize) -> Option<&CrdtElement> {
        let (idx, _) = splay_forest::locate(&self.nodes, self.root, index + 1)?;
        Some(&self.nodes[idx as usize].value)
    }

    /// Number of live elements before `created_at`.
    pub fn index_of(&self, created_at: &TimeTicket) -> Option<usize> {
        let idx = *self.by_created_at.get(created_at)?;
        Some(splay_forest::index_of(&self.nodes, idx))
    }

    /// Creation ticket of the closest live predecessor (the head's ticket if
    /// there is none).
    pub fn prev_created_at(&self, created_at: &TimeTicket) -> Result<TimeTicket, DocError> {
        let mut node = self.handle(created_at)?;
        loop {
            match self.nodes[node as usize].prev {
                Some(prev) if prev != HEAD && self.nodes[prev as usize].value.is_removed() => {
                    node = prev
                }
                Some(prev) => return Ok(self.nodes[prev as usize].value.created_at()),
                None => return Ok(TimeTicket::INITIAL),
            }
        }
    }

    pub fn last_created_at(&self) -> TimeTicket {
        if self.last == HEAD {
            TimeTicket::INITIAL
        } else {
            self.nodes[self.last as usize].value.created_at()
        }
    }

    /// Tombstones the element. Returns `true` when a live element was
    /// removed.
    pub fn delete(
        &mut self,
        created_at: &TimeTicket,
        executed_at: TimeTicket,
    ) -> Result<bool, DocError> {
        let idx = self.handle(created_at)?;
        let value = &mut self.nodes[idx as usize].value;
        let was_live = !value.is_removed();
        let removed = value.remove(executed_at) && was_live;
        if removed {
            self.root = splay_forest::splay(&mut self.nodes, self.root, idx);
        }
        Ok(removed)
    }

    pub fn delete_by_index(
        &mut self,
        index: usize,
        executed_at: TimeTicket,
    ) -> Result<Option<TimeTicket>, DocError> {
        let Some(idx) = self.handle_by_index(index) else {
            return Ok(None);
        };
        let created_at = self.nodes[idx as usize].value.created_at();
        Ok(self.delete(&created_at, executed_at)?.then_some(created_at))
    }

    /// Physically unlinks a collected element.
    pub fn purge(&mut self, created_at: &TimeTicket) -> bool {
        let Some(idx) = self.by_created_at.get(created_at).copied() else {
            return false;
        };
        if idx == HEAD {
            return false;
        }
        self.unlink(idx);
        self.by_created_at.remove(created_at);
        self.nodes[idx as usize] = ListNode::new(placeholder());
        self.free.push(idx);
        true
    }

    fn walk(&self) -> impl Iterator<Item = &CrdtElement> {
        let mut curr = self.nodes[HEAD as usize].next;
        std::iter::from_fn(move || {
            let idx = curr?;
            curr = self.nodes[idx as usize].next;
            Some(&self.nodes[idx as usize].value)
        })
    }

    /// Live elements in order.
    pub fn iter(&self) -> impl Iterator<Item = &CrdtElement> {
        self.walk().filter(|e| !e.is_removed())
    }

    /// Every element in order, tombstones included.
    pub fn elements(&self) -> impl Iterator<Item = &CrdtElement> {
        self.walk()
    }

    /// Number of live elements.
    pub fn len(&self) -> usize {
        splay_forest::weight_of(&self.nodes, self.root)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
