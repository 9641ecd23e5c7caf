//! Observable deltas emitted by operation execution.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Content inserted by a text edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextEditValue {
    pub content: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

/// One observable effect of an operation. `path` is the `$`-rooted path of
/// the element the operation targeted (the container for `set`, `remove`,
/// `add` and `move`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OpInfo {
    Set {
        path: String,
        key: String,
    },
    Remove {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
    },
    Add {
        path: String,
        index: usize,
    },
    Move {
        path: String,
        previous_index: usize,
        index: usize,
    },
    Edit {
        path: String,
        from: usize,
        to: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<TextEditValue>,
    },
    Style {
        path: String,
        from: usize,
        to: usize,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        value: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        removed_keys: Vec<String>,
    },
    TreeEdit {
        path: String,
        from: usize,
        to: usize,
        from_path: Vec<usize>,
        to_path: Vec<usize>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        value: Vec<Value>,
        split_level: u32,
    },
    TreeStyle {
        path: String,
        from: usize,
        to: usize,
        from_path: Vec<usize>,
        to_path: Vec<usize>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        value: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        removed_keys: Vec<String>,
    },
    Increase {
        path: String,
        value: Value,
    },
}

impl OpInfo {
    pub fn path(&self) -> &str {
        match self {
            OpInfo::Set { path, .. }
            | OpInfo::Remove { path, .. }
            | OpInfo::Add { path, .. }
            | OpInfo::Move { path, .. }
            | OpInfo::Edit { path, .. }
            | OpInfo::Style { path, .. }
            | OpInfo::TreeEdit { path, .. }
            | OpInfo::TreeStyle { path, .. }
            | OpInfo::Increase { path, .. } => path,
        }
    }

    /// Tag used in the serialized form.
    pub fn kind(&self) -> &'static str {
        match self {
            OpInfo::Set { .. } => "set",
            OpInfo::Remove { .. } => "remove",
            OpInfo::Add { .. } => "add",
            OpInfo::Move { .. } => "move",
            OpInfo::Edit { .. } => "edit",
            OpInfo::Style { .. } => "style",
            OpInfo::TreeEdit { .. } => "tree-edit",
            OpInfo::TreeStyle { .. } => "tree-style",
            OpInfo::Increase { .. } => "increase",
        }
    }
}
