//! Index arithmetic over the visible part of a [`CrdtTree`].
//!
//! Every live element contributes an open and a close token, every live text
//! node one token per character. An index addresses the gap between two
//! tokens; index `0` sits right after the root's open token, so the root
//! content spans `[0, root.size]`.
//!
//! A path addresses the same gap by descending through live child offsets.
//! The last path element is a child offset, except inside an element that
//! has text children, where it is the content offset (sum of padded sizes of
//! the preceding children plus the offset into a text node).

use serde::{Deserialize, Serialize};

use super::node::TreeNodeId;
use super::{CrdtTree, TreeNode};
use crate::error::DocError;

/// A gap relative to one node: a character offset for text nodes, a live
/// child offset for elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IndexPos {
    pub(crate) node: u32,
    pub(crate) offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Start,
    End,
    Text,
}

/// A visited token with the absolute index range it covers.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Token {
    pub(crate) node: u32,
    pub(crate) kind: TokenKind,
    /// For `Start`: whether the element's close token is in range too.
    pub(crate) ended: bool,
    pub(crate) from: usize,
    pub(crate) to: usize,
}

/// Public view of a node visited by a range query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNodeRef {
    pub id: TreeNodeId,
    pub node_type: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeToken {
    pub node: TreeNodeRef,
    pub kind: TokenKind,
}

impl CrdtTree {
    pub(crate) fn node(&self, idx: u32) -> &TreeNode {
        &self.nodes[idx as usize]
    }

    pub(crate) fn live_children(&self, idx: u32) -> impl Iterator<Item = u32> + '_ {
        self.nodes[idx as usize]
            .children
            .iter()
            .copied()
            .filter(move |&c| !self.nodes[c as usize].is_removed())
    }

    fn has_text_child(&self, idx: u32) -> bool {
        self.live_children(idx).any(|c| self.node(c).is_text())
    }

    /// Number of live children of `parent` before `child`; `child` itself
    /// may be a tombstone.
    pub(crate) fn offset_of(&self, parent: u32, child: u32) -> Option<usize> {
        let mut offset = 0;
        for &c in &self.node(parent).children {
            if c == child {
                return Some(offset);
            }
            if !self.node(c).is_removed() {
                offset += 1;
            }
        }
        None
    }

    fn size_before(&self, parent: u32, child: u32) -> usize {
        self.node(parent)
            .children
            .iter()
            .take_while(|&&c| c != child)
            .filter(|&&c| !self.node(c).is_removed())
            .map(|&c| self.node(c).padded_size())
            .sum()
    }

    pub(crate) fn ref_of(&self, idx: u32) -> TreeNodeRef {
        let n = self.node(idx);
        TreeNodeRef {
            id: n.id,
            node_type: n.node_type.clone(),
            value: n.is_text().then(|| n.value.clone()),
        }
    }

    // ── index ⇄ position ─────────────────────────────────────────────────

    pub(crate) fn find_tree_pos(
        &self,
        node: u32,
        index: usize,
        prefer_text: bool,
    ) -> Result<IndexPos, DocError> {
        let n = self.node(node);
        if index > n.size {
            return Err(DocError::PositionNotFound(format!(
                "index {index} beyond size {}",
                n.size
            )));
        }
        if n.is_text() {
            return Ok(IndexPos { node, offset: index });
        }
        let mut offset = 0;
        let mut pos = 0;
        for child in self.live_children(node) {
            let c = self.node(child);
            let rel = index - pos;
            if prefer_text && c.is_text() && c.size >= rel {
                return self.find_tree_pos(child, rel, prefer_text);
            }
            if rel == 0 {
                return Ok(IndexPos { node, offset });
            }
            if !prefer_text && c.padded_size() == rel {
                return Ok(IndexPos {
                    node,
                    offset: offset + 1,
                });
            }
            if c.padded_size() > rel {
                let open = usize::from(!c.is_text());
                return self.find_tree_pos(child, rel - open, prefer_text);
            }
            pos += c.padded_size();
            offset += 1;
        }
        Ok(IndexPos { node, offset })
    }

    /// Index right before the first token of `node`.
    fn start_of(&self, mut node: u32) -> usize {
        let mut index = 0;
        while let Some(parent) = self.node(node).parent {
            index += self.size_before(parent, node);
            if parent != self.root {
                index += 1;
            }
            node = parent;
        }
        index
    }

    pub(crate) fn index_of(&self, pos: IndexPos) -> usize {
        if self.node(pos.node).is_text() {
            return self.start_of(pos.node) + pos.offset;
        }
        let before: usize = self
            .live_children(pos.node)
            .take(pos.offset)
            .map(|c| self.node(c).padded_size())
            .sum();
        let content_start = if pos.node == self.root {
            0
        } else {
            self.start_of(pos.node) + 1
        };
        content_start + before
    }

    // ── paths ────────────────────────────────────────────────────────────

    pub(crate) fn tree_pos_to_path(&self, pos: IndexPos) -> Result<Vec<usize>, DocError> {
        let mut path = Vec::new();
        let mut node = pos.node;
        let n = self.node(node);
        if n.is_text() {
            let parent = n
                .parent
                .ok_or_else(|| DocError::invariant("text node without parent"))?;
            path.push(self.size_before(parent, node) + pos.offset);
            node = parent;
        } else if self.has_text_child(node) {
            let before = self
                .live_children(node)
                .take(pos.offset)
                .map(|c| self.node(c).padded_size())
                .sum();
            path.push(before);
        } else {
            path.push(pos.offset);
        }
        while let Some(parent) = self.node(node).parent {
            let offset = self
                .offset_of(parent, node)
                .ok_or_else(|| DocError::invariant("node missing from its parent"))?;
            path.push(offset);
            node = parent;
        }
        path.reverse();
        Ok(path)
    }

    pub(crate) fn path_to_tree_pos(&self, path: &[usize]) -> Result<IndexPos, DocError> {
        let (&last, parents) = path
            .split_last()
            .ok_or_else(|| DocError::InvalidArgument("empty tree path".into()))?;
        let mut node = self.root;
        for &step in parents {
            node = self
                .live_children(node)
                .nth(step)
                .ok_or_else(|| DocError::PositionNotFound(format!("path {path:?}")))?;
        }
        if self.has_text_child(node) {
            return self.find_text_pos(node, last, path);
        }
        if self.live_children(node).count() < last {
            return Err(DocError::PositionNotFound(format!("path {path:?}")));
        }
        Ok(IndexPos { node, offset: last })
    }

    fn find_text_pos(&self, node: u32, offset: usize, path: &[usize]) -> Result<IndexPos, DocError> {
        let not_found = || DocError::PositionNotFound(format!("path {path:?}"));
        if offset > self.node(node).size {
            return Err(not_found());
        }
        let mut pos = 0;
        let mut child_offset = 0;
        for child in self.live_children(node) {
            let c = self.node(child);
            let rel = offset - pos;
            if c.is_text() && c.size >= rel {
                return Ok(IndexPos {
                    node: child,
                    offset: rel,
                });
            }
            if rel == 0 {
                return Ok(IndexPos {
                    node,
                    offset: child_offset,
                });
            }
            if c.padded_size() > rel {
                return Err(not_found());
            }
            pos += c.padded_size();
            child_offset += 1;
        }
        Ok(IndexPos {
            node,
            offset: child_offset,
        })
    }

    pub fn index_to_path(&self, index: usize) -> Result<Vec<usize>, DocError> {
        let pos = self.find_tree_pos(self.root, index, true)?;
        self.tree_pos_to_path(pos)
    }

    pub fn path_to_index(&self, path: &[usize]) -> Result<usize, DocError> {
        let pos = self.path_to_tree_pos(path)?;
        Ok(self.index_of(pos))
    }

    // ── range traversal ──────────────────────────────────────────────────

    /// Tokens of live nodes overlapping `[from, to)`, in document order.
    pub(crate) fn tokens_in(&self, from: usize, to: usize) -> Vec<Token> {
        let mut out = Vec::new();
        self.collect_tokens(self.root, from, to, 0, &mut out);
        out
    }

    fn collect_tokens(&self, node: u32, from: usize, to: usize, base: usize, out: &mut Vec<Token>) {
        if from >= to {
            return;
        }
        let mut pos = 0;
        for child in self.live_children(node) {
            let c = self.node(child);
            let padded = c.padded_size();
            if from < pos + padded && pos < to {
                let start = base + pos;
                if c.is_text() {
                    let lo = from.saturating_sub(pos);
                    let hi = (to - pos).min(c.size);
                    out.push(Token {
                        node: child,
                        kind: TokenKind::Text,
                        ended: false,
                        from: start + lo,
                        to: start + hi,
                    });
                } else {
                    let start_contained = from <= pos;
                    let end_contained = to >= pos + padded;
                    if start_contained {
                        out.push(Token {
                            node: child,
                            kind: TokenKind::Start,
                            ended: end_contained,
                            from: start,
                            to: start + 1,
                        });
                    }
                    let inner_from = from.saturating_sub(pos + 1);
                    let inner_to = (to - pos - 1).min(c.size);
                    self.collect_tokens(child, inner_from, inner_to, start + 1, out);
                    if end_contained {
                        out.push(Token {
                            node: child,
                            kind: TokenKind::End,
                            ended: true,
                            from: start + padded - 1,
                            to: start + padded,
                        });
                    }
                }
            }
            pos += padded;
        }
    }

    fn check_range(&self, from: usize, to: usize) -> Result<(), DocError> {
        let size = self.node(self.root).size;
        if from > to || to > size {
            return Err(DocError::InvalidArgument(format!(
                "range {from}..{to} outside tree of size {size}"
            )));
        }
        Ok(())
    }

    pub fn tokens_between(&self, from: usize, to: usize) -> Result<Vec<TreeToken>, DocError> {
        self.check_range(from, to)?;
        Ok(self
            .tokens_in(from, to)
            .into_iter()
            .map(|t| TreeToken {
                node: self.ref_of(t.node),
                kind: t.kind,
            })
            .collect())
    }

    /// Distinct live nodes with at least one token in `[from, to)`, in the
    /// order their first token is visited.
    pub fn nodes_between(&self, from: usize, to: usize) -> Result<Vec<TreeNodeRef>, DocError> {
        self.check_range(from, to)?;
        let mut seen = Vec::new();
        for token in self.tokens_in(from, to) {
            if !seen.contains(&token.node) {
                seen.push(token.node);
            }
        }
        Ok(seen.into_iter().map(|n| self.ref_of(n)).collect())
    }
}
