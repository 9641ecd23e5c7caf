//! Operations on text elements.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{
    resolve, CreatedAtByActor, ExecutionResult, OpInfo, OpSource, RangeAction, RangeEdit,
    RangeReverse, Reverse, TextEditValue,
};
use crate::clock::TimeTicket;
use crate::crdt::rga_tree_split::SplitPos;
use crate::crdt::text::StyledRun;
use crate::crdt::{CrdtRoot, CrdtText};
use crate::error::DocError;

/// Replaces `[from, to)` of a text with `content`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditOperation {
    pub parent_created_at: TimeTicket,
    pub from: SplitPos,
    pub to: SplitPos,
    pub content: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_created_at_by_actor: Option<CreatedAtByActor>,
    pub executed_at: TimeTicket,
}

/// Writes and removes style attributes over `[from, to)` of a text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleOperation {
    pub parent_created_at: TimeTicket,
    pub from: SplitPos,
    pub to: SplitPos,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes_to_remove: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_created_at_by_actor: Option<CreatedAtByActor>,
    pub executed_at: TimeTicket,
}

fn text_of<'r>(
    root: &'r mut CrdtRoot,
    created_at: &TimeTicket,
    source: OpSource,
) -> Result<Option<&'r mut CrdtText>, DocError> {
    match resolve(root, created_at, source)? {
        Some(element) => element
            .as_text_mut()
            .map(Some)
            .ok_or_else(|| DocError::type_mismatch(*created_at, "text")),
        None => Ok(None),
    }
}

impl EditOperation {
    pub(super) fn execute(
        &self,
        root: &mut CrdtRoot,
        source: OpSource,
    ) -> Result<Option<ExecutionResult>, DocError> {
        let Some(text) = text_of(root, &self.parent_created_at, source)? else {
            return Ok(None);
        };
        let attributes = (!self.attributes.is_empty()).then_some(&self.attributes);
        let edit = text.edit(
            (&self.from, &self.to),
            &self.content,
            attributes,
            self.executed_at,
            self.latest_created_at_by_actor.as_ref(),
        )?;

        let inserted = self.content.chars().count();
        let removed: String = edit.removed.iter().map(|v| v.content()).collect();
        let reverse = (source != OpSource::Remote && (inserted > 0 || !removed.is_empty())).then(|| {
            let mut runs = edit.removed.iter().map(|v| v.attributes());
            let first = runs.next().unwrap_or_default();
            let attributes = if runs.all(|a| a == first) { first } else { BTreeMap::new() };
            Reverse::Range(RangeReverse {
                parent_created_at: self.parent_created_at,
                from: edit.from_index,
                to: edit.from_index + inserted,
                action: RangeAction::TextEdit {
                    content: removed,
                    attributes,
                },
            })
        });
        let range_edits = edit
            .changes
            .iter()
            .map(|change| RangeEdit {
                parent_created_at: self.parent_created_at,
                from: change.from,
                to: change.to,
                inserted: change.value.as_ref().map_or(0, |v| v.content().chars().count()),
            })
            .collect();

        for child in edit.gc_children {
            root.register_gc_pair(child, self.parent_created_at);
        }
        let path = root.create_path(&self.parent_created_at)?;
        let op_infos = edit
            .changes
            .into_iter()
            .map(|change| OpInfo::Edit {
                path: path.clone(),
                from: change.from,
                to: change.to,
                value: change.value.map(|v| TextEditValue {
                    content: v.content().to_owned(),
                    attributes: v.attributes(),
                }),
            })
            .collect();
        Ok(Some(ExecutionResult {
            op_infos,
            reverse,
            range_edits,
            created_at_by_actor: Some(edit.created_at_by_actor),
        }))
    }
}

/// The common previous values of every run, or `None` when runs differ.
fn uniform_previous(runs: &[StyledRun]) -> Option<BTreeMap<String, Option<String>>> {
    let first = runs.first()?;
    runs.iter()
        .all(|r| r.previous == first.previous)
        .then(|| first.previous.clone())
}

impl StyleOperation {
    pub(super) fn execute(
        &self,
        root: &mut CrdtRoot,
        source: OpSource,
    ) -> Result<Option<ExecutionResult>, DocError> {
        let Some(text) = text_of(root, &self.parent_created_at, source)? else {
            return Ok(None);
        };
        let latest = self.latest_created_at_by_actor.as_ref();
        let mut created_at_by_actor = CreatedAtByActor::new();
        let mut gc_children = Vec::new();
        let mut infos = Vec::new();
        let mut reverse = Some(BTreeMap::new());
        let indexes = (source != OpSource::Remote)
            .then(|| text.find_indexes_from_range((&self.from, &self.to)))
            .transpose()?;

        if !self.attributes.is_empty() {
            let style = text.set_style((&self.from, &self.to), &self.attributes, self.executed_at, latest)?;
            for run in &style.runs {
                infos.push((run.from, run.to, self.attributes.clone(), Vec::new()));
            }
            reverse = reverse.zip(uniform_previous(&style.runs)).map(|(mut acc, prev)| {
                acc.extend(prev);
                acc
            });
            created_at_by_actor.extend(style.created_at_by_actor);
            gc_children.extend(style.gc_children);
        }
        if !self.attributes_to_remove.is_empty() {
            let style = text.remove_style(
                (&self.from, &self.to),
                &self.attributes_to_remove,
                self.executed_at,
                latest,
            )?;
            for run in &style.runs {
                infos.push((run.from, run.to, BTreeMap::new(), self.attributes_to_remove.clone()));
            }
            reverse = reverse.zip(uniform_previous(&style.runs)).map(|(mut acc, prev)| {
                acc.extend(prev);
                acc
            });
            for (actor, created_at) in style.created_at_by_actor {
                let entry = created_at_by_actor.entry(actor).or_insert(created_at);
                if created_at.after(entry) {
                    *entry = created_at;
                }
            }
            gc_children.extend(style.gc_children);
        }

        for child in gc_children {
            root.register_gc_pair(child, self.parent_created_at);
        }
        let reverse = reverse
            .filter(|prev| !prev.is_empty())
            .zip(indexes)
            .map(|(prev, (from, to))| {
                let mut attributes = BTreeMap::new();
                let mut attributes_to_remove = Vec::new();
                for (key, value) in prev {
                    match value {
                        Some(value) => {
                            attributes.insert(key, value);
                        }
                        None => attributes_to_remove.push(key),
                    }
                }
                Reverse::Range(RangeReverse {
                    parent_created_at: self.parent_created_at,
                    from,
                    to,
                    action: RangeAction::TextStyle {
                        attributes,
                        attributes_to_remove,
                    },
                })
            });
        let path = root.create_path(&self.parent_created_at)?;
        let op_infos = infos
            .into_iter()
            .filter(|(from, to, _, _)| from < to)
            .map(|(from, to, value, removed_keys)| OpInfo::Style {
                path: path.clone(),
                from,
                to,
                value,
                removed_keys,
            })
            .collect();
        Ok(Some(ExecutionResult {
            op_infos,
            reverse,
            range_edits: Vec::new(),
            created_at_by_actor: Some(created_at_by_actor),
        }))
    }
}
