//! Arena-based splay trees with subtree weights.
//!
//! The replicated sequences in `collab-doc` keep their nodes in a linked list
//! for document order and additionally thread them through a splay tree whose
//! nodes carry a *weight*: the sum of the visible lengths of the subtree. The
//! tree answers two questions in amortised `O(log n)`:
//!
//! - which node covers a given visible position ([`rank::find`], which also
//!   splays it, or [`rank::locate`] under a shared borrow),
//! - at which visible position a given node starts ([`rank::index_of`]).
//!
//! Nodes never own each other. All links are `Option<u32>` indices into a
//! caller-owned slice, so the caller is free to keep any payload next to the
//! links and to reuse slots after a node has been detached.
//!
//! # Module layout
//!
//! | Module | Contents |
//! |--------|----------|
//! [`types`] | [`Node`] and [`WeightedNode`] traits |
//! [`splay`] | [`splay::rotate`] and [`splay::splay`] |
//! [`rank`] | weight maintenance, positional lookup, insertion and removal |

pub mod rank;
pub mod splay;
pub mod types;

pub use rank::{
    find, first, index_of, insert_after, last, locate, next, prev, remove, update_weight, weight_of,
};
pub use splay::{rotate, splay};
pub use types::{Node, WeightedNode};
