//! Array element backed by an [`RgaTreeList`].

use serde_json::Value;

use super::rga_tree_list::RgaTreeList;
use super::CrdtElement;
use crate::clock::TimeTicket;
use crate::error::DocError;

#[derive(Debug, Clone, Default)]
pub struct CrdtArray {
    elements: RgaTreeList,
}

impl CrdtArray {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: CrdtElement) -> Result<(), DocError> {
        self.elements.push(value)
    }

    pub fn insert_after(
        &mut self,
        prev_created_at: &TimeTicket,
        value: CrdtElement,
        executed_at: TimeTicket,
    ) -> Result<(), DocError> {
        self.elements
            .insert_after(prev_created_at, value, executed_at)
    }

    pub fn move_after(
        &mut self,
        prev_created_at: &TimeTicket,
        created_at: &TimeTicket,
        executed_at: TimeTicket,
    ) -> Result<bool, DocError> {
        self.elements
            .move_after(prev_created_at, created_at, executed_at)
    }

    pub fn get(&self, created_at: &TimeTicket) -> Option<&CrdtElement> {
        self.elements.get(created_at)
    }

    pub fn get_mut(&mut self, created_at: &TimeTicket) -> Option<&mut CrdtElement> {
        self.elements.get_mut(created_at)
    }

    pub fn get_by_index(&mut self, index: usize) -> Option<&CrdtElement> {
        self.elements.get_by_index(index)
    }

    pub fn element_at(&self, index: usize) -> Option<&CrdtElement> {
        self.elements.element_at(index)
    }

    pub fn index_of(&self, created_at: &TimeTicket) -> Option<usize> {
        self.elements.index_of(created_at)
    }

    pub fn prev_created_at(&self, created_at: &TimeTicket) -> Result<TimeTicket, DocError> {
        self.elements.prev_created_at(created_at)
    }

    pub fn last_created_at(&self) -> TimeTicket {
        self.elements.last_created_at()
    }

    pub fn delete(
        &mut self,
        created_at: &TimeTicket,
        executed_at: TimeTicket,
    ) -> Result<bool, DocError> {
        self.elements.delete(created_at, executed_at)
    }

    pub fn delete_by_index(
        &mut self,
        index: usize,
        executed_at: TimeTicket,
    ) -> Result<Option<TimeTicket>, DocError> {
        self.elements.delete_by_index(index, executed_at)
    }

    pub fn purge(&mut self, created_at: &TimeTicket) -> bool {
        self.elements.purge(created_at)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CrdtElement> {
        self.elements.iter()
    }

    pub fn elements(&self) -> impl Iterator<Item = &CrdtElement> {
        self.elements.elements()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn to_json_value(&self, sorted: bool) -> Value {
        Value::Array(self.iter().map(|e| e.to_json_value(sorted)).collect())
    }
}
