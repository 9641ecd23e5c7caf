//! Weight maintenance and positional queries.
//!
//! Positions are visible offsets: a node covers the half-open range
//! `(start, start + len]` when looked up through [`find`], which means that a
//! position sitting exactly on a boundary resolves to the end of the node on
//! its left. Position `0` resolves to the leftmost node with offset `0`.

use crate::splay::splay;
use crate::types::WeightedNode;

#[inline]
fn get_p<N: WeightedNode>(arena: &[N], idx: u32) -> Option<u32> {
    arena[idx as usize].p()
}
#[inline]
fn get_l<N: WeightedNode>(arena: &[N], idx: u32) -> Option<u32> {
    arena[idx as usize].l()
}
#[inline]
fn get_r<N: WeightedNode>(arena: &[N], idx: u32) -> Option<u32> {
    arena[idx as usize].r()
}

/// Weight of an optional subtree.
#[inline]
pub fn weight_of<N: WeightedNode>(arena: &[N], idx: Option<u32>) -> usize {
    idx.map_or(0, |i| arena[i as usize].weight())
}

/// Recomputes the cached weight of `idx` from its length and its children.
pub fn update_weight<N: WeightedNode>(arena: &mut [N], idx: u32) {
    let weight = arena[idx as usize].len()
        + weight_of(arena, get_l(arena, idx))
        + weight_of(arena, get_r(arena, idx));
    arena[idx as usize].set_weight(weight);
}

/// Inserts `node` immediately after `target` in in-order sequence and makes
/// it the new root. With no `target` the node becomes the leftmost node.
pub fn insert_after<N: WeightedNode>(
    arena: &mut [N],
    root: Option<u32>,
    target: Option<u32>,
    node: u32,
) -> Option<u32> {
    let Some(target) = target else {
        arena[node as usize].set_p(None);
        arena[node as usize].set_l(None);
        arena[node as usize].set_r(root);
        if let Some(r) = root {
            arena[r as usize].set_p(Some(node));
        }
        update_weight(arena, node);
        return Some(node);
    };
    splay(arena, root, target);
    let right = get_r(arena, target);
    arena[node as usize].set_p(None);
    arena[node as usize].set_r(right);
    if let Some(r) = right {
        arena[r as usize].set_p(Some(node));
    }
    arena[node as usize].set_l(Some(target));
    arena[target as usize].set_p(Some(node));
    arena[target as usize].set_r(None);
    update_weight(arena, target);
    update_weight(arena, node);
    Some(node)
}

/// Detaches `node` from the tree and returns the new root. The node's links
/// are cleared, its slot may be reused by the caller.
pub fn remove<N: WeightedNode>(arena: &mut [N], root: Option<u32>, node: u32) -> Option<u32> {
    splay(arena, root, node);
    let left = get_l(arena, node);
    let right = get_r(arena, node);
    if let Some(l) = left {
        arena[l as usize].set_p(None);
    }
    if let Some(r) = right {
        arena[r as usize].set_p(None);
    }
    let new_root = match left {
        Some(l) => {
            let max = last(arena, Some(l)).unwrap_or(l);
            let l = splay(arena, Some(l), max).unwrap_or(max);
            arena[l as usize].set_r(right);
            if let Some(r) = right {
                arena[r as usize].set_p(Some(l));
            }
            update_weight(arena, l);
            Some(l)
        }
        None => right,
    };
    let detached = &mut arena[node as usize];
    detached.set_p(None);
    detached.set_l(None);
    detached.set_r(None);
    new_root
}

/// Like [`locate`], then splays the found node to the root and stores the
/// new root in `root`.
pub fn find<N: WeightedNode>(arena: &mut [N], root: &mut Option<u32>, pos: usize) -> Option<(u32, usize)> {
    let (node, offset) = locate(arena, *root, pos)?;
    *root = splay(arena, *root, node);
    Some((node, offset))
}

/// Finds the node covering visible position `pos` and the offset into it,
/// without restructuring the tree. For shared borrows; see [`find`].
///
/// Returns `None` when `pos` is beyond the total weight of the tree.
pub fn locate<N: WeightedNode>(arena: &[N], root: Option<u32>, pos: usize) -> Option<(u32, usize)> {
    let mut node = root?;
    if pos > arena[node as usize].weight() {
        return None;
    }
    let mut pos = pos;
    loop {
        let left = get_l(arena, node);
        let left_weight = weight_of(arena, left);
        if let Some(l) = left {
            if pos <= left_weight {
                node = l;
                continue;
            }
        }
        let len = arena[node as usize].len();
        if let Some(r) = get_r(arena, node) {
            if left_weight + len < pos {
                pos -= left_weight + len;
                node = r;
                continue;
            }
        }
        pos -= left_weight;
        break;
    }
    if pos > arena[node as usize].len() {
        return None;
    }
    Some((node, pos))
}

/// Visible position at which `node` starts.
pub fn index_of<N: WeightedNode>(arena: &[N], node: u32) -> usize {
    let mut index = weight_of(arena, get_l(arena, node));
    let mut curr = node;
    while let Some(p) = get_p(arena, curr) {
        if get_r(arena, p) == Some(curr) {
            index += weight_of(arena, get_l(arena, p)) + arena[p as usize].len();
        }
        curr = p;
    }
    index
}

/// Leftmost node.
pub fn first<N: WeightedNode>(arena: &[N], root: Option<u32>) -> Option<u32> {
    let mut curr = root?;
    while let Some(l) = get_l(arena, curr) {
        curr = l;
    }
    Some(curr)
}

/// Rightmost node.
pub fn last<N: WeightedNode>(arena: &[N], root: Option<u32>) -> Option<u32> {
    let mut curr = root?;
    while let Some(r) = get_r(arena, curr) {
        curr = r;
    }
    Some(curr)
}

/// In-order successor.
pub fn next<N: WeightedNode>(arena: &[N], curr: u32) -> Option<u32> {
    if let Some(r) = get_r(arena, curr) {
        return first(arena, Some(r));
    }
    let mut curr = curr;
    while let Some(p) = get_p(arena, curr) {
        if get_l(arena, p) == Some(curr) {
            return Some(p);
        }
        curr = p;
    }
    None
}

/// In-order predecessor.
pub fn prev<N: WeightedNode>(arena: &[N], curr: u32) -> Option<u32> {
    if let Some(l) = get_l(arena, curr) {
        return last(arena, Some(l));
    }
    let mut curr = curr;
    while let Some(p) = get_p(arena, curr) {
        if get_r(arena, p) == Some(curr) {
            return Some(p);
        }
        curr = p;
    }
    None
}
