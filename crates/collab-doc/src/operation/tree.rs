//! Operations on tree elements.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{
    resolve, CreatedAtByActor, ExecutionResult, OpInfo, OpSource, RangeAction, RangeEdit,
    RangeReverse, Reverse,
};
use crate::clock::TimeTicket;
use crate::crdt::tree::{StyledNode, TreeChange, TreeChangeKind, TreeNodeData, TreePos, TreeStyle};
use crate::crdt::{CrdtRoot, CrdtTree};
use crate::error::DocError;

/// Replaces `[from, to)` of a tree with `contents`, splitting
/// `split_level` ancestors at `from`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeEditOperation {
    pub parent_created_at: TimeTicket,
    pub from: TreePos,
    pub to: TreePos,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contents: Vec<TreeNodeData>,
    #[serde(default)]
    pub split_level: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_created_at_by_actor: Option<CreatedAtByActor>,
    pub executed_at: TimeTicket,
}

/// Writes attributes (JSON-encoded values) on the elements starting in
/// `[from, to)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetAttributeOperation {
    pub parent_created_at: TimeTicket,
    pub from: TreePos,
    pub to: TreePos,
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_created_at_by_actor: Option<CreatedAtByActor>,
    pub executed_at: TimeTicket,
}

/// Removes attribute keys from the elements starting in `[from, to)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveAttributeOperation {
    pub parent_created_at: TimeTicket,
    pub from: TreePos,
    pub to: TreePos,
    pub keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_created_at_by_actor: Option<CreatedAtByActor>,
    pub executed_at: TimeTicket,
}

fn tree_of<'r>(
    root: &'r mut CrdtRoot,
    created_at: &TimeTicket,
    source: OpSource,
) -> Result<Option<&'r mut CrdtTree>, DocError> {
    match resolve(root, created_at, source)? {
        Some(element) => element
            .as_tree_mut()
            .map(Some)
            .ok_or_else(|| DocError::type_mismatch(*created_at, "tree")),
        None => Ok(None),
    }
}

fn change_info(path: &str, change: TreeChange, split_level: u32) -> OpInfo {
    match change.kind {
        TreeChangeKind::Content => OpInfo::TreeEdit {
            path: path.to_owned(),
            from: change.from,
            to: change.to,
            from_path: change.from_path,
            to_path: change.to_path,
            value: change.contents.iter().map(TreeNodeData::to_json_value).collect(),
            split_level,
        },
        TreeChangeKind::Style | TreeChangeKind::RemoveStyle => OpInfo::TreeStyle {
            path: path.to_owned(),
            from: change.from,
            to: change.to,
            from_path: change.from_path,
            to_path: change.to_path,
            value: change.attributes,
            removed_keys: change.removed_keys,
        },
    }
}

impl TreeEditOperation {
    pub(super) fn execute(
        &self,
        root: &mut CrdtRoot,
        source: OpSource,
    ) -> Result<Option<ExecutionResult>, DocError> {
        let Some(tree) = tree_of(root, &self.parent_created_at, source)? else {
            return Ok(None);
        };
        let edit = tree.edit(
            (&self.from, &self.to),
            &self.contents,
            self.split_level,
            self.executed_at,
            self.latest_created_at_by_actor.as_ref(),
        )?;

        let reverse = match edit.reverse.filter(|_| source != OpSource::Remote) {
            Some(r) if r.inserted_size > 0 || !r.removed.is_empty() => Some(Reverse::Range(RangeReverse {
                parent_created_at: self.parent_created_at,
                from: r.from_index,
                to: r.from_index + r.inserted_size,
                action: RangeAction::TreeEdit { contents: r.removed },
            })),
            _ => None,
        };
        let mut range_edits: Vec<RangeEdit> = edit
            .changes
            .iter()
            .filter(|c| c.kind == TreeChangeKind::Content && c.from < c.to)
            .map(|c| RangeEdit {
                parent_created_at: self.parent_created_at,
                from: c.from,
                to: c.to,
                inserted: 0,
            })
            .collect();
        if edit.inserted_size > 0 {
            range_edits.push(RangeEdit {
                parent_created_at: self.parent_created_at,
                from: edit.from_index,
                to: edit.from_index,
                inserted: edit.inserted_size,
            });
        }

        for child in edit.gc_children {
            root.register_gc_pair(child, self.parent_created_at);
        }
        let path = root.create_path(&self.parent_created_at)?;
        Ok(Some(ExecutionResult {
            op_infos: edit
                .changes
                .into_iter()
                .map(|c| change_info(&path, c, self.split_level))
                .collect(),
            reverse,
            range_edits,
            created_at_by_actor: Some(edit.created_at_by_actor),
        }))
    }
}

/// The previous values shared by every styled node, or `None` when they
/// differ.
fn uniform_previous(styled: &[StyledNode]) -> Option<BTreeMap<String, Option<String>>> {
    let first = styled.first()?;
    styled
        .iter()
        .all(|s| s.previous == first.previous)
        .then(|| first.previous.clone())
}

/// Action restoring `previous`: values that existed are written back, keys
/// that were absent are removed. Mixed restores are not expressible as one
/// action.
fn attribute_reverse(previous: BTreeMap<String, Option<String>>) -> Option<RangeAction> {
    if previous.is_empty() {
        return None;
    }
    if previous.values().all(Option::is_none) {
        return Some(RangeAction::RemoveAttribute {
            keys: previous.into_keys().collect(),
        });
    }
    let attributes: Option<BTreeMap<_, _>> = previous
        .into_iter()
        .map(|(key, value)| value.map(|v| (key, v)))
        .collect();
    attributes.map(|attributes| RangeAction::SetAttribute { attributes })
}

fn style_reverse(parent_created_at: TimeTicket, style: &TreeStyle, source: OpSource) -> Option<Reverse> {
    if source == OpSource::Remote {
        return None;
    }
    let action = uniform_previous(&style.styled).and_then(attribute_reverse)?;
    Some(Reverse::Range(RangeReverse {
        parent_created_at,
        from: style.from_index,
        to: style.to_index,
        action,
    }))
}

impl SetAttributeOperation {
    pub(super) fn execute(
        &self,
        root: &mut CrdtRoot,
        source: OpSource,
    ) -> Result<Option<ExecutionResult>, DocError> {
        let Some(tree) = tree_of(root, &self.parent_created_at, source)? else {
            return Ok(None);
        };
        let style = tree.style(
            (&self.from, &self.to),
            &self.attributes,
            self.executed_at,
            self.latest_created_at_by_actor.as_ref(),
        )?;
        let reverse = style_reverse(self.parent_created_at, &style, source);
        for child in style.gc_children {
            root.register_gc_pair(child, self.parent_created_at);
        }
        let path = root.create_path(&self.parent_created_at)?;
        Ok(Some(ExecutionResult {
            op_infos: style
                .changes
                .into_iter()
                .map(|c| change_info(&path, c, 0))
                .collect(),
            reverse,
            range_edits: Vec::new(),
            created_at_by_actor: Some(style.created_at_by_actor),
        }))
    }
}

impl RemoveAttributeOperation {
    pub(super) fn execute(
        &self,
        root: &mut CrdtRoot,
        source: OpSource,
    ) -> Result<Option<ExecutionResult>, DocError> {
        let Some(tree) = tree_of(root, &self.parent_created_at, source)? else {
            return Ok(None);
        };
        let style = tree.remove_style(
            (&self.from, &self.to),
            &self.keys,
            self.executed_at,
            self.latest_created_at_by_actor.as_ref(),
        )?;
        let reverse = style_reverse(self.parent_created_at, &style, source);
        for child in style.gc_children {
            root.register_gc_pair(child, self.parent_created_at);
        }
        let path = root.create_path(&self.parent_created_at)?;
        Ok(Some(ExecutionResult {
            op_infos: style
                .changes
                .into_iter()
                .map(|c| change_info(&path, c, 0))
                .collect(),
            reverse,
            range_edits: Vec::new(),
            created_at_by_actor: Some(style.created_at_by_actor),
        }))
    }
}
