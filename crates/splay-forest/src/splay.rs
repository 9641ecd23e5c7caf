//! Bottom-up splaying over index links.
//!
//! Everything is built from one primitive, [`rotate`], which lifts a node
//! over its parent and recomputes the two weights that changed. Zig-zig and
//! zig-zag steps are two rotations in the order the step requires.

use crate::rank::update_weight;
use crate::types::WeightedNode;

#[inline]
fn parent<N: WeightedNode>(arena: &[N], idx: u32) -> Option<u32> {
    arena[idx as usize].p()
}

#[inline]
fn is_left_child<N: WeightedNode>(arena: &[N], parent: u32, child: u32) -> bool {
    arena[parent as usize].l() == Some(child)
}

/// Lifts `x` one level over its parent. No-op on the root.
///
/// ```text
///       p              x
///      / \            / \
///     x   c    →     a   p
///    / \                / \
///   a   b              b   c
/// ```
///
/// and the mirror image when `x` is a right child. The subtree `b` that
/// crosses over is re-parented; the grandparent, if any, points at `x`
/// afterwards. Weights of `p` and then `x` are refreshed; nothing above
/// them changes, since the set of nodes below the grandparent is the same.
pub fn rotate<N: WeightedNode>(arena: &mut [N], x: u32) {
    let Some(p) = parent(arena, x) else {
        return;
    };
    let grand = parent(arena, p);
    let from_left = is_left_child(arena, p, x);

    let crossing = if from_left {
        let b = arena[x as usize].r();
        arena[p as usize].set_l(b);
        arena[x as usize].set_r(Some(p));
        b
    } else {
        let b = arena[x as usize].l();
        arena[p as usize].set_r(b);
        arena[x as usize].set_l(Some(p));
        b
    };
    if let Some(b) = crossing {
        arena[b as usize].set_p(Some(p));
    }
    arena[p as usize].set_p(Some(x));
    arena[x as usize].set_p(grand);
    if let Some(g) = grand {
        if is_left_child(arena, g, p) {
            arena[g as usize].set_l(Some(x));
        } else {
            arena[g as usize].set_r(Some(x));
        }
    }

    update_weight(arena, p);
    update_weight(arena, x);
}

/// Splays `node` to the root and returns it as the new root.
///
/// The node's own weight is refreshed first, so this is also the way to
/// propagate a change of [`WeightedNode::len`] to every ancestor: each
/// rotation on the way up recomputes the nodes it passes.
pub fn splay<N: WeightedNode>(arena: &mut [N], root: Option<u32>, node: u32) -> Option<u32> {
    update_weight(arena, node);
    while let Some(p) = parent(arena, node) {
        if let Some(g) = parent(arena, p) {
            let zig_zig = is_left_child(arena, g, p) == is_left_child(arena, p, node);
            rotate(arena, if zig_zig { p } else { node });
        }
        rotate(arena, node);
    }
    root.map(|_| node)
}
