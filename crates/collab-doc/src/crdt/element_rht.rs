//! ElementRHT: the member table of an object.
//!
//! Every key owns a queue of elements ordered by creation ticket. The last
//! entry of the queue is the head; the key is visible when the head is live.
//! Concurrent sets of the same key therefore resolve to the newest element on
//! every replica, while the losers stay around as tombstones until they are
//! collected.

use std::collections::HashMap;

use indexmap::IndexMap;

use super::CrdtElement;
use crate::clock::TimeTicket;

#[derive(Debug, Clone)]
struct ElementRhtNode {
    key: String,
    element: CrdtElement,
}

#[derive(Debug, Clone, Default)]
pub struct ElementRht {
    keys: IndexMap<String, Vec<TimeTicket>>,
    nodes: HashMap<TimeTicket, ElementRhtNode>,
}

impl ElementRht {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `element` under `key`.
    ///
    /// Returns the creation ticket of the element that became a tombstone:
    /// either the previous live head, demoted by a newer element, or the
    /// incoming element itself when a newer one already holds the key.
    pub fn set(
        &mut self,
        key: &str,
        mut element: CrdtElement,
        executed_at: TimeTicket,
    ) -> Option<TimeTicket> {
        let created_at = element.created_at();
        let queue = self.keys.entry(key.to_owned()).or_default();
        let mut removed = None;
        if let Some(&head) = queue.last() {
            if created_at.after(&head) {
                if let Some(node) = self.nodes.get_mut(&head) {
                    let was_live = !node.element.is_removed();
                    if node.element.remove(executed_at) && was_live {
                        removed = Some(head);
                    }
                }
            } else if element.remove(head) {
                removed = Some(created_at);
            }
        }
        let at = queue.partition_point(|t| t < &created_at);
        queue.insert(at, created_at);
        self.nodes.insert(
            created_at,
            ElementRhtNode {
                key: key.to_owned(),
                element,
            },
        );
        removed
    }

    /// Tombstones the element created at `created_at`. Returns `true` when a
    /// live element was removed.
    pub fn delete(&mut self, created_at: &TimeTicket, executed_at: TimeTicket) -> bool {
        match self.nodes.get_mut(created_at) {
            Some(node) => {
                let was_live = !node.element.is_removed();
                node.element.remove(executed_at) && was_live
            }
            None => false,
        }
    }

    /// Tombstones the current head of `key`.
    pub fn delete_by_key(&mut self, key: &str, executed_at: TimeTicket) -> Option<TimeTicket> {
        let head = *self.keys.get(key)?.last()?;
        self.delete(&head, executed_at).then_some(head)
    }

    /// Live element under `key`.
    pub fn get(&self, key: &str) -> Option<&CrdtElement> {
        let head = self.keys.get(key)?.last()?;
        self.nodes
            .get(head)
            .map(|n| &n.element)
            .filter(|e| !e.is_removed())
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn get_by_id(&self, created_at: &TimeTicket) -> Option<&CrdtElement> {
        self.nodes.get(created_at).map(|n| &n.element)
    }

    pub fn get_by_id_mut(&mut self, created_at: &TimeTicket) -> Option<&mut CrdtElement> {
        self.nodes.get_mut(created_at).map(|n| &mut n.element)
    }

    /// Key under which `created_at` is stored.
    pub fn key_of(&self, created_at: &TimeTicket) -> Option<&str> {
        self.nodes.get(created_at).map(|n| n.key.as_str())
    }

    /// Physically drops a collected element.
    pub fn purge(&mut self, created_at: &TimeTicket) -> bool {
        let Some(node) = self.nodes.remove(created_at) else {
            return false;
        };
        if let Some(queue) = self.keys.get_mut(&node.key) {
            queue.retain(|t| t != created_at);
            if queue.is_empty() {
                self.keys.shift_remove(&node.key);
            }
        }
        true
    }

    /// Live `(key, element)` pairs in first-insertion order of the keys.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CrdtElement)> {
        self.keys
            .keys()
            .filter_map(|key| self.get(key).map(|e| (key.as_str(), e)))
    }

    /// Every stored element, tombstones included.
    pub fn elements(&self) -> impl Iterator<Item = &CrdtElement> {
        self.keys
            .values()
            .flat_map(|queue| queue.iter())
            .filter_map(|t| self.nodes.get(t).map(|n| &n.element))
    }

    /// Every stored `(key, element)` pair, tombstones included.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &CrdtElement)> {
        self.keys.iter().flat_map(move |(key, queue)| {
            queue
                .iter()
                .filter_map(move |t| self.nodes.get(t).map(|n| (key.as_str(), &n.element)))
        })
    }

    /// Reinserts an element from a snapshot as is, without resolving it
    /// against the current head.
    pub(crate) fn restore(&mut self, key: &str, element: CrdtElement) {
        let created_at = element.created_at();
        let queue = self.keys.entry(key.to_owned()).or_default();
        let at = queue.partition_point(|t| t < &created_at);
        queue.insert(at, created_at);
        self.nodes.insert(
            created_at,
            ElementRhtNode {
                key: key.to_owned(),
                element,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ActorId;
    use crate::crdt::PrimitiveValue;

    fn t(lamport: u64) -> TimeTicket {
        TimeTicket::new(lamport, 0, ActorId::INITIAL)
    }

    fn prim(v: i32, at: TimeTicket) -> CrdtElement {
        CrdtElement::primitive(PrimitiveValue::Integer(v), at)
    }

    #[test]
    fn newer_set_demotes_head() {
        let mut rht = ElementRht::new();
        assert_eq!(rht.set("k", prim(1, t(1)), t(1)), None);
        assert_eq!(rht.set("k", prim(2, t(2)), t(2)), Some(t(1)));
        assert_eq!(rht.get("k").unwrap().created_at(), t(2));
        assert!(rht.get_by_id(&t(1)).unwrap().is_removed());
    }

    #[test]
    fn older_set_loses_immediately() {
        let mut rht = ElementRht::new();
        rht.set("k", prim(2, t(2)), t(2));
        assert_eq!(rht.set("k", prim(1, t(1)), t(1)), Some(t(1)));
        assert_eq!(rht.get("k").unwrap().created_at(), t(2));
        assert_eq!(rht.elements().count(), 2);
    }

    #[test]
    fn delete_by_key_hides_key() {
        let mut rht = ElementRht::new();
        rht.set("a", prim(1, t(1)), t(1));
        rht.set("b", prim(1, t(2)), t(2));
        assert_eq!(rht.delete_by_key("a", t(3)), Some(t(1)));
        assert!(!rht.has("a"));
        assert_eq!(rht.iter().map(|(k, _)| k).collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(rht.delete_by_key("a", t(4)), None);
    }

    #[test]
    fn purge_drops_key_when_queue_empties() {
        let mut rht = ElementRht::new();
        rht.set("a", prim(1, t(1)), t(1));
        rht.delete(&t(1), t(2));
        assert!(rht.purge(&t(1)));
        assert_eq!(rht.elements().count(), 0);
        assert!(rht.key_of(&t(1)).is_none());
    }
}
