//! Operations on objects, arrays and counters.

use serde::{Deserialize, Serialize};

use super::{resolve, ExecutionResult, OpInfo, OpSource, Operation, Reverse};
use crate::clock::TimeTicket;
use crate::crdt::{CrdtElement, CrdtRoot, ElementValue, PrimitiveValue};
use crate::error::DocError;

/// Stores `value` under `key` of the object `parent_created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetOperation {
    pub parent_created_at: TimeTicket,
    pub key: String,
    pub value: CrdtElement,
    pub executed_at: TimeTicket,
}

/// Removes the member or item `created_at` of `parent_created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveOperation {
    pub parent_created_at: TimeTicket,
    pub created_at: TimeTicket,
    pub executed_at: TimeTicket,
}

/// Inserts `value` into an array after `prev_created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddOperation {
    pub parent_created_at: TimeTicket,
    pub prev_created_at: TimeTicket,
    pub value: CrdtElement,
    pub executed_at: TimeTicket,
}

/// Moves the array item `created_at` behind `prev_created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveOperation {
    pub parent_created_at: TimeTicket,
    pub prev_created_at: TimeTicket,
    pub created_at: TimeTicket,
    pub executed_at: TimeTicket,
}

/// Adds `value` to the counter `parent_created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncreaseOperation {
    pub parent_created_at: TimeTicket,
    pub value: PrimitiveValue,
    pub executed_at: TimeTicket,
}

impl SetOperation {
    pub(super) fn execute(
        &self,
        root: &mut CrdtRoot,
        source: OpSource,
    ) -> Result<Option<ExecutionResult>, DocError> {
        let Some(parent) = resolve(root, &self.parent_created_at, source)? else {
            return Ok(None);
        };
        let object = parent
            .as_object_mut()
            .ok_or_else(|| DocError::type_mismatch(self.parent_created_at, "object"))?;
        let previous = object.get(&self.key).cloned();
        let created_at = self.value.created_at();
        let removed = object.set(&self.key, self.value.clone(), self.executed_at);

        if let Some(removed) = removed {
            root.register_removed_element(removed);
        }
        root.register_element(self.parent_created_at, created_at)?;

        let reverse_op = match previous {
            Some(previous) => Operation::Set(SetOperation {
                parent_created_at: self.parent_created_at,
                key: self.key.clone(),
                value: previous,
                executed_at: self.executed_at,
            }),
            None => Operation::Remove(RemoveOperation {
                parent_created_at: self.parent_created_at,
                created_at,
                executed_at: self.executed_at,
            }),
        };
        Ok(Some(ExecutionResult {
            op_infos: vec![OpInfo::Set {
                path: root.create_path(&self.parent_created_at)?,
                key: self.key.clone(),
            }],
            reverse: Some(Reverse::Op(reverse_op)),
            ..ExecutionResult::default()
        }))
    }
}

impl RemoveOperation {
    pub(super) fn execute(
        &self,
        root: &mut CrdtRoot,
        source: OpSource,
    ) -> Result<Option<ExecutionResult>, DocError> {
        let Some(parent) = resolve(root, &self.parent_created_at, source)? else {
            return Ok(None);
        };
        let target = match parent.child(&self.created_at) {
            Some(target) if source == OpSource::UndoRedo && target.is_removed() => return Ok(None),
            Some(target) => target.clone(),
            None if source == OpSource::UndoRedo => return Ok(None),
            None => return Err(DocError::not_found(self.created_at)),
        };

        let (removed, info, reverse_op) = match &mut parent.value {
            ElementValue::Object(object) => {
                let key = object
                    .key_of(&self.created_at)
                    .map(str::to_owned)
                    .ok_or_else(|| DocError::invariant("object member without key"))?;
                let removed = object.delete(&self.created_at, self.executed_at);
                let reverse = Operation::Set(SetOperation {
                    parent_created_at: self.parent_created_at,
                    key: key.clone(),
                    value: target,
                    executed_at: self.executed_at,
                });
                (removed, (Some(key), None), reverse)
            }
            ElementValue::Array(array) => {
                let index = array.index_of(&self.created_at);
                let prev_created_at = array.prev_created_at(&self.created_at)?;
                let removed = array.delete(&self.created_at, self.executed_at)?;
                let reverse = Operation::Add(AddOperation {
                    parent_created_at: self.parent_created_at,
                    prev_created_at,
                    value: target,
                    executed_at: self.executed_at,
                });
                (removed, (None, index), reverse)
            }
            _ => return Err(DocError::type_mismatch(self.parent_created_at, "container")),
        };
        if !removed {
            return Ok(Some(ExecutionResult::default()));
        }
        root.register_removed_element(self.created_at);
        let (key, index) = info;
        Ok(Some(ExecutionResult {
            op_infos: vec![OpInfo::Remove {
                path: root.create_path(&self.parent_created_at)?,
                key,
                index,
            }],
            reverse: Some(Reverse::Op(reverse_op)),
            ..ExecutionResult::default()
        }))
    }
}

impl AddOperation {
    pub(super) fn execute(
        &self,
        root: &mut CrdtRoot,
        source: OpSource,
    ) -> Result<Option<ExecutionResult>, DocError> {
        let Some(parent) = resolve(root, &self.parent_created_at, source)? else {
            return Ok(None);
        };
        let array = parent
            .as_array_mut()
            .ok_or_else(|| DocError::type_mismatch(self.parent_created_at, "array"))?;
        let prev_known =
            self.prev_created_at == TimeTicket::INITIAL || array.get(&self.prev_created_at).is_some();
        if !prev_known && source == OpSource::UndoRedo {
            tracing::warn!(prev = %self.prev_created_at, "history entry anchors on a purged item, skipped");
            return Ok(None);
        }
        let created_at = self.value.created_at();
        array.insert_after(&self.prev_created_at, self.value.clone(), self.executed_at)?;
        let index = array
            .index_of(&created_at)
            .ok_or_else(|| DocError::invariant("inserted item missing"))?;
        root.register_element(self.parent_created_at, created_at)?;
        Ok(Some(ExecutionResult {
            op_infos: vec![OpInfo::Add {
                path: root.create_path(&self.parent_created_at)?,
                index,
            }],
            reverse: Some(Reverse::Op(Operation::Remove(RemoveOperation {
                parent_created_at: self.parent_created_at,
                created_at,
                executed_at: self.executed_at,
            }))),
            ..ExecutionResult::default()
        }))
    }
}

impl MoveOperation {
    pub(super) fn execute(
        &self,
        root: &mut CrdtRoot,
        source: OpSource,
    ) -> Result<Option<ExecutionResult>, DocError> {
        let Some(parent) = resolve(root, &self.parent_created_at, source)? else {
            return Ok(None);
        };
        let array = parent
            .as_array_mut()
            .ok_or_else(|| DocError::type_mismatch(self.parent_created_at, "array"))?;
        if source == OpSource::UndoRedo {
            let target_live = array.get(&self.created_at).is_some_and(|e| !e.is_removed());
            let prev_known = self.prev_created_at == TimeTicket::INITIAL
                || array.get(&self.prev_created_at).is_some();
            if !target_live || !prev_known {
                tracing::warn!(target = %self.created_at, "history entry moves a missing item, skipped");
                return Ok(None);
            }
        }
        let previous_index = array.index_of(&self.created_at);
        let former_prev = array.prev_created_at(&self.created_at)?;
        if !array.move_after(&self.prev_created_at, &self.created_at, self.executed_at)? {
            return Ok(Some(ExecutionResult::default()));
        }
        let index = array.index_of(&self.created_at);
        let is_live = array.get(&self.created_at).is_some_and(|e| !e.is_removed());
        let path = root.create_path(&self.parent_created_at)?;
        let op_infos = match (previous_index, index) {
            (Some(previous_index), Some(index)) if is_live => vec![OpInfo::Move {
                path,
                previous_index,
                index,
            }],
            _ => Vec::new(),
        };
        Ok(Some(ExecutionResult {
            op_infos,
            reverse: Some(Reverse::Op(Operation::Move(MoveOperation {
                parent_created_at: self.parent_created_at,
                prev_created_at: former_prev,
                created_at: self.created_at,
                executed_at: self.executed_at,
            }))),
            ..ExecutionResult::default()
        }))
    }
}

impl IncreaseOperation {
    pub(super) fn execute(
        &self,
        root: &mut CrdtRoot,
        source: OpSource,
    ) -> Result<Option<ExecutionResult>, DocError> {
        let Some(parent) = resolve(root, &self.parent_created_at, source)? else {
            return Ok(None);
        };
        let counter = parent
            .as_counter_mut()
            .ok_or_else(|| DocError::type_mismatch(self.parent_created_at, "counter"))?;
        counter.increase(&self.value)?;
        let reverse_op = self.value.negated().map(|value| {
            Operation::Increase(IncreaseOperation {
                parent_created_at: self.parent_created_at,
                value,
                executed_at: self.executed_at,
            })
        });
        Ok(Some(ExecutionResult {
            op_infos: vec![OpInfo::Increase {
                path: root.create_path(&self.parent_created_at)?,
                value: self.value.to_json_value(),
            }],
            reverse: reverse_op.map(Reverse::Op),
            ..ExecutionResult::default()
        }))
    }
}
