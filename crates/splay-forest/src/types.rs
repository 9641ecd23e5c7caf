//! Node trait definitions.
//!
//! Each "pointer" is an `Option<u32>` index into a slice-backed arena. All
//! tree-manipulation functions take the arena as `&mut [N]` and work with
//! indices.

/// Tree links (`p`, `l`, `r`).
pub trait Node {
    fn p(&self) -> Option<u32>;
    fn l(&self) -> Option<u32>;
    fn r(&self) -> Option<u32>;
    fn set_p(&mut self, v: Option<u32>);
    fn set_l(&mut self, v: Option<u32>);
    fn set_r(&mut self, v: Option<u32>);
}

/// A node that contributes a length to its subtree weight.
///
/// `len` is the visible length of the node itself (zero for tombstones);
/// `weight` caches `len` plus the weights of both children and is refreshed
/// by the rotations in [`crate::splay`] and by [`crate::rank::update_weight`].
pub trait WeightedNode: Node {
    fn len(&self) -> usize;
    fn weight(&self) -> usize;
    fn set_weight(&mut self, weight: usize);
}
