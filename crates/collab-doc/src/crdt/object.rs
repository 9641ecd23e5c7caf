//! Object element: string keys mapped to nested elements.

use serde_json::{Map, Value};

use super::element_rht::ElementRht;
use super::CrdtElement;
use crate::clock::TimeTicket;

#[derive(Debug, Clone, Default)]
pub struct CrdtObject {
    members: ElementRht,
}

impl CrdtObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// See [`ElementRht::set`].
    pub fn set(
        &mut self,
        key: &str,
        element: CrdtElement,
        executed_at: TimeTicket,
    ) -> Option<TimeTicket> {
        self.members.set(key, element, executed_at)
    }

    pub fn delete(&mut self, created_at: &TimeTicket, executed_at: TimeTicket) -> bool {
        self.members.delete(created_at, executed_at)
    }

    pub fn delete_by_key(&mut self, key: &str, executed_at: TimeTicket) -> Option<TimeTicket> {
        self.members.delete_by_key(key, executed_at)
    }

    pub fn get(&self, key: &str) -> Option<&CrdtElement> {
        self.members.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.members.has(key)
    }

    pub fn get_by_id(&self, created_at: &TimeTicket) -> Option<&CrdtElement> {
        self.members.get_by_id(created_at)
    }

    pub fn get_by_id_mut(&mut self, created_at: &TimeTicket) -> Option<&mut CrdtElement> {
        self.members.get_by_id_mut(created_at)
    }

    pub fn key_of(&self, created_at: &TimeTicket) -> Option<&str> {
        self.members.key_of(created_at)
    }

    pub fn purge(&mut self, created_at: &TimeTicket) -> bool {
        self.members.purge(created_at)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|(k, _)| k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CrdtElement)> {
        self.members.iter()
    }

    /// Every member, tombstones included.
    pub fn elements(&self) -> impl Iterator<Item = &CrdtElement> {
        self.members.elements()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &CrdtElement)> {
        self.members.entries()
    }

    pub(crate) fn restore(&mut self, key: &str, element: CrdtElement) {
        self.members.restore(key, element);
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn to_json_value(&self, sorted: bool) -> Value {
        let mut members: Vec<(&str, &CrdtElement)> = self.iter().collect();
        if sorted {
            members.sort_by(|a, b| a.0.cmp(b.0));
        }
        let mut map = Map::new();
        for (key, element) in members {
            map.insert(key.to_owned(), element.to_json_value(sorted));
        }
        Value::Object(map)
    }
}
