//! Document configuration.

use serde::{Deserialize, Serialize};

use super::schema::Schema;
use crate::error::DocError;

pub const DEFAULT_MAX_UNDO_DEPTH: usize = 50;

/// Options fixed when a document is created.
///
/// Deserializes from JSON with every field optional:
///
/// ```json
/// { "disable_gc": false, "max_undo_depth": 50, "schema": { "rules": [] } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentOptions {
    /// Makes [`garbage_collect`](super::Document::garbage_collect) a no-op.
    pub disable_gc: bool,
    pub max_undo_depth: usize,
    pub schema: Option<Schema>,
}

impl Default for DocumentOptions {
    fn default() -> Self {
        Self {
            disable_gc: false,
            max_undo_depth: DEFAULT_MAX_UNDO_DEPTH,
            schema: None,
        }
    }
}

impl DocumentOptions {
    pub fn from_json(json: &str) -> Result<Self, DocError> {
        serde_json::from_str(json).map_err(|e| DocError::InvalidArgument(format!("options: {e}")))
    }
}
