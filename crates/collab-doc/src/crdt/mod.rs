//! Replicated data types and the element model built from them.
//!
//! A document is a tree of [`CrdtElement`]s: scalars and counters at the
//! leaves, objects and arrays as containers, and text and tree elements that
//! carry their own sequence CRDTs. Containers own their children; lookups by
//! creation ticket go through the registry in [`root::CrdtRoot`].

pub mod array;
pub mod counter;
pub mod element_rht;
pub mod object;
pub mod primitive;
pub mod rga_tree_list;
pub mod rga_tree_split;
pub mod rht;
pub mod root;
pub mod snapshot;
pub mod text;
pub mod tree;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use self::array::CrdtArray;
pub use self::counter::CounterValue;
pub use self::object::CrdtObject;
pub use self::primitive::PrimitiveValue;
pub use self::rht::Rht;
pub use self::root::{CrdtRoot, GcChild};
pub use self::text::{CrdtText, TextValue};
pub use self::tree::CrdtTree;
use crate::clock::{TicketFactory, TimeTicket};
use crate::error::DocError;

// ── meta ──────────────────────────────────────────────────────────────────

/// Lifecycle tickets shared by every element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementMeta {
    pub(crate) created_at: TimeTicket,
    pub(crate) moved_at: Option<TimeTicket>,
    pub(crate) removed_at: Option<TimeTicket>,
}

impl ElementMeta {
    pub fn new(created_at: TimeTicket) -> Self {
        Self {
            created_at,
            moved_at: None,
            removed_at: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ElementValue {
    Primitive(PrimitiveValue),
    Counter(CounterValue),
    Object(CrdtObject),
    Array(CrdtArray),
    Text(CrdtText),
    Tree(CrdtTree),
}

/// Returned by a [`DescendantVisitor`] to continue or stop a traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Traverse {
    Continue,
    Stop,
}

/// Visits every descendant of a container, tombstones included, parents
/// before children.
pub trait DescendantVisitor {
    fn visit(&mut self, element: &CrdtElement, parent: &CrdtElement) -> Traverse;
}

impl<F> DescendantVisitor for F
where
    F: FnMut(&CrdtElement, &CrdtElement) -> Traverse,
{
    fn visit(&mut self, element: &CrdtElement, parent: &CrdtElement) -> Traverse {
        self(element, parent)
    }
}

// ── CrdtElement ───────────────────────────────────────────────────────────

/// Serializes through [`snapshot::ElementStruct`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "snapshot::ElementStruct", try_from = "snapshot::ElementStruct")]
pub struct CrdtElement {
    pub(crate) meta: ElementMeta,
    pub(crate) value: ElementValue,
}

/// Structural equality, tombstones and tickets included.
impl PartialEq for CrdtElement {
    fn eq(&self, other: &Self) -> bool {
        snapshot::ElementStruct::from(self) == snapshot::ElementStruct::from(other)
    }
}

macro_rules! accessors {
    ($variant:ident, $ty:ty, $as_ref:ident, $as_mut:ident) => {
        pub fn $as_ref(&self) -> Option<&$ty> {
            match &self.value {
                ElementValue::$variant(v) => Some(v),
                _ => None,
            }
        }

        pub fn $as_mut(&mut self) -> Option<&mut $ty> {
            match &mut self.value {
                ElementValue::$variant(v) => Some(v),
                _ => None,
            }
        }
    };
}

impl CrdtElement {
    pub fn new(value: ElementValue, created_at: TimeTicket) -> Self {
        Self {
            meta: ElementMeta::new(created_at),
            value,
        }
    }

    pub fn primitive(value: PrimitiveValue, created_at: TimeTicket) -> Self {
        Self::new(ElementValue::Primitive(value), created_at)
    }

    pub fn counter(value: CounterValue, created_at: TimeTicket) -> Self {
        Self::new(ElementValue::Counter(value), created_at)
    }

    pub fn object(value: CrdtObject, created_at: TimeTicket) -> Self {
        Self::new(ElementValue::Object(value), created_at)
    }

    pub fn array(value: CrdtArray, created_at: TimeTicket) -> Self {
        Self::new(ElementValue::Array(value), created_at)
    }

    pub fn text(value: CrdtText, created_at: TimeTicket) -> Self {
        Self::new(ElementValue::Text(value), created_at)
    }

    pub fn tree(value: CrdtTree, created_at: TimeTicket) -> Self {
        Self::new(ElementValue::Tree(value), created_at)
    }

    pub fn meta(&self) -> &ElementMeta {
        &self.meta
    }

    pub fn value(&self) -> &ElementValue {
        &self.value
    }

    pub fn created_at(&self) -> TimeTicket {
        self.meta.created_at
    }

    pub fn moved_at(&self) -> Option<TimeTicket> {
        self.meta.moved_at
    }

    pub fn removed_at(&self) -> Option<TimeTicket> {
        self.meta.removed_at
    }

    /// Ticket that orders the element among its siblings.
    pub fn positioned_at(&self) -> TimeTicket {
        self.meta.moved_at.unwrap_or(self.meta.created_at)
    }

    pub fn is_removed(&self) -> bool {
        self.meta.removed_at.is_some()
    }

    /// Tombstones the element at `removed_at`. A later removal overwrites an
    /// earlier one; returns whether the ticket was written.
    pub fn remove(&mut self, removed_at: TimeTicket) -> bool {
        if !removed_at.after(&self.positioned_at()) {
            return false;
        }
        if self.meta.removed_at.is_some_and(|r| !removed_at.after(&r)) {
            return false;
        }
        self.meta.removed_at = Some(removed_at);
        true
    }

    pub fn set_moved_at(&mut self, moved_at: TimeTicket) -> bool {
        if self.meta.moved_at.is_some_and(|m| !moved_at.after(&m)) {
            return false;
        }
        self.meta.moved_at = Some(moved_at);
        true
    }

    accessors!(Primitive, PrimitiveValue, as_primitive, as_primitive_mut);
    accessors!(Counter, CounterValue, as_counter, as_counter_mut);
    accessors!(Object, CrdtObject, as_object, as_object_mut);
    accessors!(Array, CrdtArray, as_array, as_array_mut);
    accessors!(Text, CrdtText, as_text, as_text_mut);
    accessors!(Tree, CrdtTree, as_tree, as_tree_mut);

    /// Schema-level type name: the scalar kind for primitives.
    pub fn type_name(&self) -> &'static str {
        match &self.value {
            ElementValue::Primitive(p) => p.type_name(),
            ElementValue::Counter(_) => "counter",
            ElementValue::Object(_) => "object",
            ElementValue::Array(_) => "array",
            ElementValue::Text(_) => "text",
            ElementValue::Tree(_) => "tree",
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self.value, ElementValue::Object(_) | ElementValue::Array(_))
    }

    // ── children ─────────────────────────────────────────────────────────

    /// Direct child created at `created_at`, tombstones included.
    pub fn child(&self, created_at: &TimeTicket) -> Option<&CrdtElement> {
        match &self.value {
            ElementValue::Object(o) => o.get_by_id(created_at),
            ElementValue::Array(a) => a.get(created_at),
            _ => None,
        }
    }

    pub fn child_mut(&mut self, created_at: &TimeTicket) -> Option<&mut CrdtElement> {
        match &mut self.value {
            ElementValue::Object(o) => o.get_by_id_mut(created_at),
            ElementValue::Array(a) => a.get_mut(created_at),
            _ => None,
        }
    }

    /// Direct children, tombstones included.
    pub fn children(&self) -> Box<dyn Iterator<Item = &CrdtElement> + '_> {
        match &self.value {
            ElementValue::Object(o) => Box::new(o.elements()),
            ElementValue::Array(a) => Box::new(a.elements()),
            _ => Box::new(std::iter::empty()),
        }
    }

    /// Path segment of a direct child: its key, or its live index.
    pub fn sub_path_of(&self, created_at: &TimeTicket) -> Option<String> {
        match &self.value {
            ElementValue::Object(o) => o.key_of(created_at).map(str::to_owned),
            ElementValue::Array(a) => a.index_of(created_at).map(|i| i.to_string()),
            _ => None,
        }
    }

    /// Physically drops a collected child.
    pub fn purge_child(&mut self, created_at: &TimeTicket) -> bool {
        match &mut self.value {
            ElementValue::Object(o) => o.purge(created_at),
            ElementValue::Array(a) => a.purge(created_at),
            _ => false,
        }
    }

    pub fn descendants<V: DescendantVisitor + ?Sized>(&self, visitor: &mut V) -> Traverse {
        for child in self.children() {
            if visitor.visit(child, self) == Traverse::Stop {
                return Traverse::Stop;
            }
            if child.is_container() && child.descendants(visitor) == Traverse::Stop {
                return Traverse::Stop;
            }
        }
        Traverse::Continue
    }

    // ── copies ───────────────────────────────────────────────────────────

    /// Copy of the live content stamped `created_at`; descendants and
    /// sequence fragments take fresh tickets from `tickets`. Every
    /// `(old, new)` creation ticket pair is appended to `remap`.
    pub fn restamp(
        &self,
        created_at: TimeTicket,
        tickets: &mut TicketFactory,
        remap: &mut Vec<(TimeTicket, TimeTicket)>,
    ) -> Result<CrdtElement, DocError> {
        remap.push((self.created_at(), created_at));
        let value = match &self.value {
            ElementValue::Primitive(p) => ElementValue::Primitive(p.clone()),
            ElementValue::Counter(c) => ElementValue::Counter(*c),
            ElementValue::Object(o) => {
                let mut copy = CrdtObject::new();
                for (key, member) in o.iter() {
                    let child_at = tickets.issue();
                    let member = member.restamp(child_at, tickets, remap)?;
                    copy.set(key, member, child_at);
                }
                ElementValue::Object(copy)
            }
            ElementValue::Array(a) => {
                let mut copy = CrdtArray::new();
                for item in a.iter() {
                    let child_at = tickets.issue();
                    copy.push(item.restamp(child_at, tickets, remap)?)?;
                }
                ElementValue::Array(copy)
            }
            ElementValue::Text(t) => ElementValue::Text(t.restamped(tickets)),
            ElementValue::Tree(t) => ElementValue::Tree(t.restamped(tickets)?),
        };
        Ok(CrdtElement::new(value, created_at))
    }

    // ── projections ──────────────────────────────────────────────────────

    /// JSON view of the live content; `sorted` orders object keys.
    pub fn to_json_value(&self, sorted: bool) -> Value {
        match &self.value {
            ElementValue::Primitive(p) => p.to_json_value(),
            ElementValue::Counter(c) => c.to_json_value(),
            ElementValue::Object(o) => o.to_json_value(sorted),
            ElementValue::Array(a) => a.to_json_value(sorted),
            ElementValue::Text(t) => t.to_json_value(),
            ElementValue::Tree(t) => t.to_json_value(),
        }
    }
}
